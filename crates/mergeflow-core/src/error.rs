//! Error kinds surfaced by the orchestration engine
//!
//! Layer-specific errors (store, queue, transactions) live beside their
//! layers and convert into [`OrchestrationError`] where they cross the
//! engine boundary.

use std::time::Duration;

/// Convenience result alias for engine-facing operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Error kinds for orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Referenced entity does not exist (milestone, task, transaction, ...)
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration (milestone, workflow, template, blocker id)
    #[error("conflict: {0}")]
    Conflict(String),

    /// An invariant was violated (weight range, dependency cycle, missing field)
    #[error("validation failed: {0}")]
    Validation(String),

    /// A step executor exceeded the step's timeout
    #[error("step '{step_id}' timed out after {timeout:?}")]
    StepTimeout { step_id: String, timeout: Duration },

    /// No step executor registered for a task's type
    #[error("no executor registered for step type: {0}")]
    ExecutorMissing(String),

    /// A milestone or step references an unknown dependency
    #[error("unknown dependency: {0}")]
    Dependency(String),

    /// Informational: a dequeue found nothing to do
    ///
    /// `dequeue` itself reports emptiness as `Ok(None)`; this kind exists
    /// for callers that need an error value for an empty queue.
    #[error("queue is empty")]
    QueueEmpty,

    /// An operation failed and its transaction was rolled back
    ///
    /// The message carries the original cause.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// A wrapped failure from persistence or the queue
    #[error("external failure: {0}")]
    External(String),
}

impl OrchestrationError {
    /// Build a `NotFound` for an entity kind and id
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// Build a `Conflict` for a duplicate id
    pub fn conflict(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::Conflict(format!("{kind} {id} already exists"))
    }

    /// Whether this error came from outside the engine
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = OrchestrationError::not_found("milestone", "m-1");
        assert_eq!(err.to_string(), "not found: milestone m-1");

        let err = OrchestrationError::conflict("workflow", "pr_analysis");
        assert_eq!(err.to_string(), "conflict: workflow pr_analysis already exists");
    }

    #[test]
    fn test_step_timeout_display() {
        let err = OrchestrationError::StepTimeout {
            step_id: "analyze".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("analyze"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_is_external() {
        assert!(OrchestrationError::External("db down".into()).is_external());
        assert!(!OrchestrationError::QueueEmpty.is_external());
    }
}
