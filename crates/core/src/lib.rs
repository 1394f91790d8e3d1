#![allow(clippy::result_large_err)]
//! chartmig-core: record graph, codecs and merge passes for chart of
//! accounts migration.
//!
//! A batch flows through the crate in four steps:
//!
//! 1. [`tree::decode`] and [`tabular::decode`] turn source documents into
//!    normalized [`Record`]s (see [`registry`] for the per-kind rules);
//! 2. [`Batch::collect`] merges them by identity;
//! 3. [`Batch::rewrite`] runs the ordered rewrite passes;
//! 4. [`finalize`] splits the graph into one [`TemplateUnit`] per chart
//!    template, ready for [`tabular::encode`] and the literal renderer.
//!
//! [`convert()`] runs all four over the sources of a [`SourceProvider`].

pub mod catalog;
pub mod convert;
pub mod error;
pub mod expr;
pub mod mapping;
pub mod merge;
pub mod record;
pub mod registry;
pub mod resolve;
pub mod source;
pub mod tabular;
pub mod template;
pub mod tree;
pub mod value;

// ── Convenience re-exports: key types ────────────────────────────────

pub use catalog::TranslationCatalog;
pub use error::{MigrateError, Result};
pub use mapping::MappingTable;
pub use merge::{Batch, GroupKey, KindMap};
pub use record::{Field, FieldSource, Record, ValueType, CHART_TEMPLATE_KIND};
pub use registry::Context;
pub use source::{FileSystemProvider, InMemoryProvider, Source, SourceFormat, SourceProvider};
pub use template::TemplateUnit;
pub use value::{Edge, Payload, Value};

// ── Convenience re-exports: pipeline entry points ────────────────────

pub use convert::{convert, load, Conversion, Loaded, SkippedSource, SourceChange};
pub use resolve::{qualify, unqualify};
pub use template::finalize;
pub use tree::{Outcome, TreeDocument};
