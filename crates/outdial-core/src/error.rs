//! Error types for the Outdial dialing core.

use thiserror::Error;

/// Errors raised by the scheduling core and its collaborators.
#[derive(Error, Debug)]
pub enum OutdialError {
    /// A required field is missing, null or malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No row for the given id, or the row is no longer in use.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store read/write failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Lost a compare-and-set race against another scheduler.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// An object with the same key is already registered.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutdialError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            OutdialError::Validation(_) => "validation",
            OutdialError::NotFound(_) => "not_found",
            OutdialError::Persistence(_) => "persistence",
            OutdialError::ConcurrencyConflict(_) => "concurrency_conflict",
            OutdialError::Duplicate(_) => "duplicate",
            OutdialError::Config(_) => "config",
            OutdialError::Io(_) => "io",
        }
    }

    /// Only lost compare-and-set races are retried inside the core.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OutdialError::ConcurrencyConflict(_))
    }
}

pub type Result<T> = std::result::Result<T, OutdialError>;
