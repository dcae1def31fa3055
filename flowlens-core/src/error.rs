//! Error types for flowlens-core

use thiserror::Error;

/// Main error type for the flowlens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Flow not found
    #[error("flow not found: {0}")]
    NotFound(String),

    /// Lifecycle violation (e.g., chunk appended after a terminal state)
    #[error("invalid state for flow {id}: {message}")]
    InvalidState { id: String, message: String },

    /// Storage failure that callers must handle without crashing
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error (bad filter, unsupported export format, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error (malformed redaction pattern, ...)
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Build an invalid-state error for a flow
    pub fn invalid_state(id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidState {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for flowlens-core
pub type Result<T> = std::result::Result<T, Error>;
