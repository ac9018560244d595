//! Error types for the mend_core library.

use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for mend_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Well-formed input that would break a record invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// No record with this id exists
    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Store-level failure that is not an IO error
    #[error("Storage error: {0}")]
    Storage(String),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rendering a text report failed
    #[error("Formatting error: {0}")]
    Format(#[from] std::fmt::Error),
}

impl Error {
    /// True for failures of the underlying persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Json(_) | Error::Csv(_) | Error::Storage(_)
        )
    }

    /// True when the caller can fix the input and try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::InvariantViolation(_) | Error::NotFound(_)
        )
    }
}
