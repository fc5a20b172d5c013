//! Store error type

use mergeflow_core::OrchestrationError;

/// Error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint or duplicate registration
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    pub fn conflict(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::Conflict(format!("{kind} {id} already exists"))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => OrchestrationError::NotFound(msg),
            StoreError::Conflict(msg) => OrchestrationError::Conflict(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => {
                OrchestrationError::External(msg)
            }
        }
    }
}
