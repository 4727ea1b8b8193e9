//! Error types for Crucible CI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced repository, ref, submission, task or run does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input: task descriptors, run settings, repository names.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation contradicts stored state (double completion, canceling
    /// finished work, duplicate records).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The repository change source failed or was unreachable.
    #[error("Upstream error: {0}")]
    Upstream(String),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Error::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
