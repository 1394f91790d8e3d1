use std::path::PathBuf;

/// All errors raised while decoding, normalizing and merging a batch.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// One input source could not be read as a document. The batch skips
    /// the source and continues.
    #[error("malformed source {source_name}: {message}")]
    MalformedSource {
        source_name: String,
        message: String,
    },

    /// A merge pass referenced an identity that is not in the graph.
    #[error("missing {kind} '{id}'")]
    MissingIdentity { kind: String, id: String },

    /// A record lacks a field a pass depends on.
    #[error("{kind} '{id}' has no field '{field}'")]
    MissingField {
        kind: String,
        id: String,
        field: String,
    },

    /// A designated field holds a value of the wrong shape.
    #[error("cannot convert field '{field}' value {value:?} to {target}")]
    Coercion {
        field: String,
        value: String,
        target: &'static str,
    },

    /// A legacy identifier has no entry in the mapping table.
    #[error("no qualifier mapped for '{0}'")]
    UnknownQualifier(String),

    /// The graph reached a state the passes do not support.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MigrateError {
    pub fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::MalformedSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// True when the error only invalidates the source it came from.
    pub fn is_source_local(&self) -> bool {
        matches!(self, MigrateError::MalformedSource { .. })
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
