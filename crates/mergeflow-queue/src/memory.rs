//! In-memory implementation of the task queue
//!
//! Same semantics as the PostgreSQL implementation; used by tests and
//! single-process deployments. The ready set is a `BTreeMap` keyed so
//! that iteration order is `(priority_score DESC, created_at ASC, id
//! ASC)`; delayed retries sit in a side collection until their back-off
//! elapses and are promoted on dequeue.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::queue::{
    retry_delay, DeadLetter, FailOutcome, QueueError, QueueStats, QueuedTask, TaskQueue,
    VISIBILITY_TIMEOUT,
};

type ReadyKey = (Reverse<i32>, DateTime<Utc>, Uuid);

fn ready_key(task: &QueuedTask) -> ReadyKey {
    (Reverse(task.priority_score), task.created_at, task.id)
}

struct Lease {
    task: QueuedTask,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    ready: BTreeMap<ReadyKey, QueuedTask>,
    delayed: Vec<(DateTime<Utc>, QueuedTask)>,
    processing: HashMap<Uuid, Lease>,
    dead: VecDeque<DeadLetter>,
}

impl Inner {
    fn contains(&self, id: Uuid) -> bool {
        self.ready.values().any(|t| t.id == id)
            || self.delayed.iter().any(|(_, t)| t.id == id)
            || self.processing.contains_key(&id)
            || self.dead.iter().any(|d| d.task.id == id)
    }

    /// Move due delayed retries into the ready set
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let mut remaining = Vec::with_capacity(self.delayed.len());
        for (not_before, task) in self.delayed.drain(..) {
            if not_before <= now {
                self.ready.insert(ready_key(&task), task);
            } else {
                remaining.push((not_before, task));
            }
        }
        self.delayed = remaining;
    }
}

/// In-memory task queue
///
/// # Example
///
/// ```
/// use mergeflow_queue::InMemoryTaskQueue;
///
/// let queue = InMemoryTaskQueue::new();
/// ```
pub struct InMemoryTaskQueue {
    inner: Mutex<Inner>,
    visibility_timeout: Duration,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            visibility_timeout: VISIBILITY_TIMEOUT,
        }
    }

    /// Override the lease TTL (for tests that exercise recovery)
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            visibility_timeout,
        }
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.contains(task.id) {
            debug!(id = %task.id, "enqueue ignored: id already queued");
            return Ok(());
        }
        inner.ready.insert(ready_key(&task), task);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedTask>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.promote_due(now);

        let Some((&key, _)) = inner.ready.iter().next() else {
            return Ok(None);
        };
        let Some(task) = inner.ready.remove(&key) else {
            return Ok(None);
        };

        inner.processing.insert(
            task.id,
            Lease {
                task: task.clone(),
                expires_at: now
                    + chrono::Duration::from_std(self.visibility_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            },
        );
        Ok(Some(task))
    }

    async fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.processing.remove(&id).is_none() {
            warn!(%id, "complete called without a lease");
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<FailOutcome, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let Some(lease) = inner.processing.remove(&id) else {
            warn!(%id, "fail called without a lease");
            return Ok(FailOutcome::UnknownLease);
        };

        let mut task = lease.task;
        if task.retry_count + 1 <= max_retries {
            let delay = retry_delay(task.retry_count);
            task.retry_count += 1;
            let not_before = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            let retry_count = task.retry_count;
            inner.delayed.push((not_before, task));
            Ok(FailOutcome::WillRetry { retry_count, delay })
        } else {
            inner.dead.push_back(DeadLetter {
                task,
                failed_at: now,
                error: error.to_string(),
            });
            Ok(FailOutcome::DeadLettered)
        }
    }

    async fn recover_stale(&self) -> Result<Vec<Uuid>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let expired: Vec<Uuid> = inner
            .processing
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            // Retry count travels with the entry unchanged: recovery is
            // not a failure and never consumes retry budget
            if let Some(lease) = inner.processing.remove(id) {
                inner.ready.insert(ready_key(&lease.task), lease.task);
            }
        }
        Ok(expired)
    }

    async fn discard(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();

        if let Some(key) = inner
            .ready
            .iter()
            .find(|(_, t)| t.id == id)
            .map(|(key, _)| *key)
        {
            inner.ready.remove(&key);
            return Ok(true);
        }
        if let Some(pos) = inner.delayed.iter().position(|(_, t)| t.id == id) {
            inner.delayed.remove(pos);
            return Ok(true);
        }
        Ok(inner.processing.remove(&id).is_some())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock();
        Ok(QueueStats {
            pending: inner.ready.len() + inner.delayed.len(),
            processing: inner.processing.len(),
            dead_letter: inner.dead.len(),
        })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let inner = self.inner.lock();
        Ok(inner.dead.iter().cloned().collect())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.ready.clear();
        inner.delayed.clear();
        inner.processing.clear();
        inner.dead.clear();
        Ok(())
    }
}
