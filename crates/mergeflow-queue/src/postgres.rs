//! PostgreSQL implementation of the task queue
//!
//! A single `queued_tasks` table with a state discriminator models the
//! three collections. Claiming uses `FOR UPDATE SKIP LOCKED` so
//! concurrent workers never contend on the same row.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::queue::{
    retry_delay, DeadLetter, FailOutcome, QueueError, QueueStats, QueuedTask, TaskQueue,
    VISIBILITY_TIMEOUT,
};

const QUEUE_COLUMNS: &str =
    "id, pr_id, task_id, priority_score, payload, retry_count, created_at";

fn queued_from_row(row: &PgRow) -> QueuedTask {
    let retry_count: i32 = row.get("retry_count");
    QueuedTask {
        id: row.get("id"),
        pr_id: row.get("pr_id"),
        task_id: row.get("task_id"),
        priority_score: row.get("priority_score"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
        retry_count: retry_count.max(0) as u32,
    }
}

/// PostgreSQL-backed task queue shared across orchestrator processes
///
/// # Example
///
/// ```ignore
/// use mergeflow_queue::PostgresTaskQueue;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mergeflow").await?;
/// let queue = PostgresTaskQueue::new(pool);
/// queue.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending queue migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    #[instrument(skip(self, task), fields(id = %task.id))]
    async fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queued_tasks (id, pr_id, task_id, priority_score, payload,
                                       state, retry_count, created_at, visible_at)
             VALUES ($1, $2, $3, $4, $5, 'ready', $6, $7, NOW())
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(task.id)
        .bind(task.pr_id)
        .bind(task.task_id)
        .bind(task.priority_score)
        .bind(&task.payload)
        .bind(task.retry_count as i32)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedTask>, QueueError> {
        let row = sqlx::query(&format!(
            "WITH next AS (
                 SELECT id FROM queued_tasks
                 WHERE state = 'ready' AND visible_at <= NOW()
                 ORDER BY priority_score DESC, created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE queued_tasks q
             SET state = 'processing',
                 visible_at = NOW() + make_interval(secs => $1)
             FROM next
             WHERE q.id = next.id
             RETURNING {QUEUE_COLUMNS}"
        ))
        .bind(VISIBILITY_TIMEOUT.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| queued_from_row(&r)))
    }

    async fn complete(&self, id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queued_tasks WHERE id = $1 AND state = 'processing'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(%id, "complete called without a lease");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        max_retries: u32,
    ) -> Result<FailOutcome, QueueError> {
        let row = sqlx::query(
            "SELECT retry_count FROM queued_tasks WHERE id = $1 AND state = 'processing'",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            warn!(%id, "fail called without a lease");
            return Ok(FailOutcome::UnknownLease);
        };

        let retry_count = row.get::<i32, _>("retry_count").max(0) as u32;
        if retry_count + 1 <= max_retries {
            let delay = retry_delay(retry_count);
            sqlx::query(
                "UPDATE queued_tasks
                 SET state = 'ready',
                     retry_count = retry_count + 1,
                     visible_at = NOW() + make_interval(secs => $2),
                     last_error = $3
                 WHERE id = $1 AND state = 'processing'",
            )
            .bind(id)
            .bind(delay.as_secs_f64())
            .bind(error)
            .execute(&self.pool)
            .await?;

            Ok(FailOutcome::WillRetry {
                retry_count: retry_count + 1,
                delay,
            })
        } else {
            sqlx::query(
                "UPDATE queued_tasks
                 SET state = 'dead', failed_at = NOW(), last_error = $2
                 WHERE id = $1 AND state = 'processing'",
            )
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            Ok(FailOutcome::DeadLettered)
        }
    }

    async fn recover_stale(&self) -> Result<Vec<Uuid>, QueueError> {
        // Retry count is left untouched: recovery is not a failure
        let rows = sqlx::query(
            "UPDATE queued_tasks
             SET state = 'ready', visible_at = NOW()
             WHERE state = 'processing' AND visible_at <= NOW()
             RETURNING id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn discard(&self, id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queued_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE state = 'ready') AS pending,
                    COUNT(*) FILTER (WHERE state = 'processing') AS processing,
                    COUNT(*) FILTER (WHERE state = 'dead') AS dead
             FROM queued_tasks",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending").max(0) as usize,
            processing: row.get::<i64, _>("processing").max(0) as usize,
            dead_letter: row.get::<i64, _>("dead").max(0) as usize,
        })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS}, failed_at, last_error
             FROM queued_tasks
             WHERE state = 'dead'
             ORDER BY failed_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DeadLetter {
                task: queued_from_row(r),
                failed_at: r.get("failed_at"),
                error: r.get::<Option<String>, _>("last_error").unwrap_or_default(),
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queued_tasks")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
