//! chartmig-codegen: Python rendering of finalized template units.
//!
//! [`literal`] renders values and records as nested Python literals;
//! [`module`] wraps them into `@template` generator functions and one
//! module per template unit.

use std::fmt;

pub mod literal;
pub mod module;

pub use literal::{render, render_record};
pub use module::{render_function, render_module, GeneratedModule, PythonConfig};

/// Error type for code generation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The unit's qualifier cannot be part of a Python identifier.
    InvalidQualifier(String),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::InvalidQualifier(q) => write!(f, "invalid qualifier: '{}'", q),
        }
    }
}

impl std::error::Error for CodegenError {}
