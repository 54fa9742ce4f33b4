//! Domain errors for the Foreman orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur across the Foreman core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Repo not found: {0}")]
    RepoNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Approval not found: {0}")]
    ApprovalNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Forge error: {0}")]
    ForgeError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
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
