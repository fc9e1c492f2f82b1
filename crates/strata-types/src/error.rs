//! Shared error types for the Strata system.

use thiserror::Error;

/// Top-level error type for the Strata system.
///
/// Only [`StrataError::Storage`] is expected to cross the orchestrator
/// boundary during normal operation: vector, graph and collaborator failures
/// are caught where they happen and converted into queued retries or empty
/// result sets.
#[derive(Error, Debug)]
pub enum StrataError {
    /// The primary (SQLite) store failed. Always fatal to the enclosing call.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The vector layer failed.
    #[error("Vector store error: {0}")]
    Vector(String),

    /// The graph layer failed.
    #[error("Graph store error: {0}")]
    Graph(String),

    /// The embedding collaborator failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The extraction collaborator failed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A requested resource does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource (memory, entity, ...).
        resource: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Shorthand for a memory that does not exist.
    pub fn memory_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Memory".to_string(),
            id: id.into(),
        }
    }

    /// True when the error originated in the primary store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Internal(_))
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Alias for Result with StrataError.
pub type StrataResult<T> = Result<T, StrataError>;
