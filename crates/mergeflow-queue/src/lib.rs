//! Distributed priority task queue
//!
//! At-least-once delivery to workers through three disjoint collections:
//!
//! - **Ready set** — ordered by `(priority_score DESC, created_at ASC, id
//!   ASC)`; FIFO within one priority level, no ordering across levels
//! - **Processing set** — one lease per in-flight task with a fixed
//!   5-minute TTL; refresh is deliberately unsupported
//! - **Dead-letter tail** — append-only FIFO for tasks that exhausted
//!   their retry budget
//!
//! Failed tasks are re-enqueued after `2^retry_count` seconds of
//! wall-clock back-off until `max_retries` is exceeded. Stale leases are
//! recovered periodically; recovery preserves the retry count and never
//! consumes retry budget.

mod memory;
mod postgres;
mod queue;

pub use memory::InMemoryTaskQueue;
pub use postgres::PostgresTaskQueue;
pub use queue::{
    DeadLetter, FailOutcome, QueueError, QueueStats, QueuedTask, TaskQueue, DEFAULT_MAX_RETRIES,
    VISIBILITY_TIMEOUT,
};
