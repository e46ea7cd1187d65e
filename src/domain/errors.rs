//! Domain errors shared across the hivemind core.

use thiserror::Error;

/// Domain-level errors that can occur in the hivemind system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Driver execution failed: {0}")]
    DriverFailed(String),

    #[error("Session not found for workspace: {0}")]
    SessionNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::IoError(err.to_string())
    }
}
