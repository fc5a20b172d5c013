//! Queue contract and shared types

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mergeflow_core::model::TaskPriority;

/// Fixed lease TTL for the processing set
///
/// Leases are short and fixed; TTL refresh is not supported. Executors
/// whose wall-clock exceeds this may be re-dispatched by recovery, so
/// they must be idempotent at the result level.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default retry budget before a task is dead-lettered
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Backing store failure
    #[error("queue backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// A queued unit of work referencing a canonical task row
///
/// The queue never owns the task row; it carries just enough to hand the
/// work to a worker and to survive retries across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: Uuid,
    pub pr_id: Uuid,
    pub task_id: Uuid,
    pub priority_score: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl QueuedTask {
    /// Build a queue entry for a task, stamping `created_at = now` and a
    /// zero retry count
    pub fn new(pr_id: Uuid, task_id: Uuid, priority: TaskPriority, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            pr_id,
            task_id,
            priority_score: priority.score(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Counts over the three collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Ready entries, including retries waiting out their back-off
    pub pending: usize,

    /// In-flight leases
    pub processing: usize,

    /// Dead-letter tail length
    pub dead_letter: usize,
}

/// Dead-letter record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub task: QueuedTask,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

/// Outcome of failing a leased task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-enqueued with back-off
    WillRetry {
        retry_count: u32,
        delay: Duration,
    },

    /// Retry budget exhausted; appended to the dead-letter tail
    DeadLettered,

    /// No lease for this id; logged as a warning, not an error
    UnknownLease,
}

/// Back-off before the `retry_count`-th retry: `2^retry_count` seconds
pub fn retry_delay(retry_count: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry_count))
}

/// Priority queue with at-least-once delivery
///
/// Shared across orchestrator processes; all mutation goes through these
/// operations. Implementations must keep the three collections disjoint.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Insert into the ready set; idempotent on `id`
    async fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError>;

    /// Atomically move the highest-scoring ready entry into the
    /// processing set under a fresh lease
    ///
    /// Ties break by earliest `created_at`, then by id. An empty queue is
    /// `Ok(None)`, not an error.
    async fn dequeue(&self) -> Result<Option<QueuedTask>, QueueError>;

    /// Remove a lease after successful execution; no-op if absent
    async fn complete(&self, id: Uuid) -> Result<(), QueueError>;

    /// Remove a lease after a failure, scheduling a retry or
    /// dead-lettering per the retry budget
    async fn fail(&self, id: Uuid, error: &str, max_retries: u32)
        -> Result<FailOutcome, QueueError>;

    /// Re-enqueue every expired lease, preserving retry counts
    ///
    /// Returns the ids moved back to the ready set. Recovery never
    /// consults `max_retries`; only explicit `fail` consumes budget.
    async fn recover_stale(&self) -> Result<Vec<Uuid>, QueueError>;

    /// Drop an entry wherever it lives (used when the canonical task row
    /// has been deleted); returns whether anything was removed
    async fn discard(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Counts over the three collections
    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Snapshot of the dead-letter tail, oldest first
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;

    /// Test-only: remove all three collections
    async fn clear(&self) -> Result<(), QueueError>;
}
