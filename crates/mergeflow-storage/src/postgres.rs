//! PostgreSQL implementation of the repository contracts
//!
//! Production persistence using `sqlx` with runtime-bound queries.
//! Status enums round-trip through text columns; timestamp stamping is
//! done inside the UPDATE statements so transitions stay atomic.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use mergeflow_core::model::{
    AnalysisStatus, Blocker, BlockerSeverity, Correlation, Milestone, MilestoneState,
    MilestoneStatus, NewTask, PrEventData, PrStatus, Project, PullRequest, StepType, Task,
    TaskPriority, TaskStatus, WorkflowExecution, WorkflowExecutionStatus,
};

use crate::error::StoreError;
use crate::repos::*;

/// PostgreSQL-backed store implementing every repository trait
///
/// # Example
///
/// ```ignore
/// use mergeflow_storage::PostgresStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mergeflow").await?;
/// let store = PostgresStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn parse_enum<T: FromStr>(value: &str, what: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Serialization(format!("{what}: {e}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn project_from_row(row: &PgRow) -> Project {
    Project {
        id: row.get("id"),
        repository_id: row.get("repository_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn pr_from_row(row: &PgRow) -> Result<PullRequest, StoreError> {
    let status: String = row.get("status");
    let analysis_status: String = row.get("analysis_status");
    Ok(PullRequest {
        id: row.get("id"),
        project_id: row.get("project_id"),
        pr_number: row.get("pr_number"),
        title: row.get("title"),
        description: row.get("description"),
        author: row.get("author"),
        status: parse_enum::<PrStatus>(&status, "pr status")?,
        analysis_status: parse_enum::<AnalysisStatus>(&analysis_status, "analysis status")?,
        base_branch: row.get("base_branch"),
        head_branch: row.get("head_branch"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let task_type: String = row.get("task_type");
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    Ok(Task {
        id: row.get("id"),
        pr_id: row.get("pr_id"),
        name: row.get("name"),
        description: row.get("description"),
        task_type: parse_enum::<StepType>(&task_type, "task type")?,
        dependencies: row.get("dependencies"),
        status: parse_enum::<TaskStatus>(&status, "task status")?,
        priority: parse_enum::<TaskPriority>(&priority, "task priority")?,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn execution_from_row(row: &PgRow) -> Result<WorkflowExecution, StoreError> {
    let status: String = row.get("status");
    Ok(WorkflowExecution {
        id: row.get("id"),
        pr_id: row.get("pr_id"),
        workflow_name: row.get("workflow_name"),
        status: parse_enum::<WorkflowExecutionStatus>(&status, "execution status")?,
        current_step: row.get("current_step"),
        steps_completed: row.get("steps_completed"),
        steps_failed: row.get("steps_failed"),
        metadata: row.get("metadata"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn milestone_from_row(row: &PgRow) -> Milestone {
    let expected_ms: Option<i64> = row.get("expected_completion_time_ms");
    Milestone {
        id: row.get("id"),
        name: row.get("name"),
        workflow_id: row.get("workflow_id"),
        parent_id: row.get("parent_id"),
        weight: row.get("weight"),
        expected_completion_time: expected_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
        dependencies: row.get("dependencies"),
    }
}

fn milestone_state_from_row(row: &PgRow) -> Result<MilestoneState, StoreError> {
    let status: String = row.get("status");
    Ok(MilestoneState {
        status: parse_enum::<MilestoneStatus>(&status, "milestone status")?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        percent_complete: row.get("percent_complete"),
        blocker_reason: row.get("blocker_reason"),
        blocked_by: row.get("blocked_by"),
    })
}

fn blocker_from_row(row: &PgRow) -> Result<Blocker, StoreError> {
    let severity: String = row.get("severity");
    Ok(Blocker {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        affected_milestone_ids: row.get("affected_milestone_ids"),
        severity: parse_enum::<BlockerSeverity>(&severity, "blocker severity")?,
        description: row.get("description"),
        blocked_by: row.get("blocked_by"),
        detected_at: row.get("detected_at"),
        resolved_at: row.get("resolved_at"),
        resolution: row.get("resolution"),
        metadata: row.get("metadata"),
    })
}

fn correlation_from_row(row: &PgRow) -> Correlation {
    Correlation {
        id: row.get("id"),
        linear_issue_id: row.get("linear_issue_id"),
        pr_id: row.get("pr_id"),
        task_id: row.get("task_id"),
        workflow_execution_id: row.get("workflow_execution_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const TASK_COLUMNS: &str = "id, pr_id, name, description, task_type, dependencies, status, \
                            priority, metadata, created_at, started_at, completed_at";

const EXECUTION_COLUMNS: &str = "id, pr_id, workflow_name, status, current_step, \
                                 steps_completed, steps_failed, metadata, started_at, completed_at";

const PR_COLUMNS: &str = "id, project_id, pr_number, title, description, author, status, \
                          analysis_status, base_branch, head_branch, created_at, updated_at";

const BLOCKER_COLUMNS: &str = "id, workflow_id, affected_milestone_ids, severity, description, \
                               blocked_by, detected_at, resolved_at, resolution, metadata";

#[async_trait]
impl ProjectRepo for PostgresStore {
    async fn get_by_repository_id(
        &self,
        repository_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query(
            "SELECT id, repository_id, name, created_at, updated_at
             FROM projects WHERE repository_id = $1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| project_from_row(&r)))
    }

    #[instrument(skip(self))]
    async fn create(&self, input: NewProject) -> Result<Project, StoreError> {
        let row = sqlx::query(
            "INSERT INTO projects (id, repository_id, name)
             VALUES ($1, $2, $3)
             RETURNING id, repository_id, name, created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(&input.repository_id)
        .bind(&input.name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::conflict("project", &input.repository_id)
            } else {
                e.into()
            }
        })?;

        Ok(project_from_row(&row))
    }

    async fn update(&self, id: Uuid, name: &str) -> Result<Project, StoreError> {
        let row = sqlx::query(
            "UPDATE projects SET name = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING id, repository_id, name, created_at, updated_at",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("project", id))?;

        Ok(project_from_row(&row))
    }
}

#[async_trait]
impl PrRepo for PostgresStore {
    #[instrument(skip(self, data))]
    async fn get_or_create(
        &self,
        project_id: Uuid,
        pr_number: i64,
        data: &PrEventData,
    ) -> Result<PullRequest, StoreError> {
        // Insert-if-absent; the unique constraint arbitrates races
        sqlx::query(
            "INSERT INTO prs (id, project_id, pr_number, title, description, author, status,
                              base_branch, head_branch)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (project_id, pr_number) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(project_id)
        .bind(pr_number)
        .bind(&data.title)
        .bind(&data.description)
        .bind(&data.author)
        .bind(data.status.as_str())
        .bind(&data.base_branch)
        .bind(&data.head_branch)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&format!(
            "SELECT {PR_COLUMNS} FROM prs WHERE project_id = $1 AND pr_number = $2"
        ))
        .bind(project_id)
        .bind(pr_number)
        .fetch_one(&self.pool)
        .await?;

        pr_from_row(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PullRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PR_COLUMNS} FROM prs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| pr_from_row(&r)).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PrStatus,
        analysis_status: Option<AnalysisStatus>,
    ) -> Result<PullRequest, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE prs
             SET status = $2,
                 analysis_status = COALESCE($3, analysis_status),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {PR_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(analysis_status.map(|a| a.as_str()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("pr", id))?;

        pr_from_row(&row)
    }
}

#[async_trait]
impl TaskRepo for PostgresStore {
    #[instrument(skip(self, input), fields(task_name = %input.name))]
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO tasks (id, pr_id, name, description, task_type, dependencies,
                                status, priority, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(input.pr_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.task_type.as_str())
        .bind(&input.dependencies)
        .bind(input.priority.as_str())
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        task_from_row(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn get_by_pr(&self, pr_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE pr_id = $1 ORDER BY created_at ASC"
        ))
        .bind(pr_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError> {
        // started_at on the first transition to running; completed_at on
        // completed/failed, and on cancelled only after a start
        let row = sqlx::query(&format!(
            "UPDATE tasks
             SET status = $2,
                 started_at = CASE
                     WHEN $2 = 'running' AND started_at IS NULL THEN NOW()
                     ELSE started_at
                 END,
                 completed_at = CASE
                     WHEN $2 IN ('completed', 'failed') THEN NOW()
                     WHEN $2 = 'cancelled' AND started_at IS NOT NULL THEN NOW()
                     ELSE completed_at
                 END
             WHERE id = $1
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("task", id))?;

        debug!(%id, status = %status, "task status updated");
        task_from_row(&row)
    }

    async fn get_runnable(&self) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t
             WHERE t.status = 'pending'
               AND NOT EXISTS (
                   SELECT 1
                   FROM unnest(t.dependencies) AS dep(id)
                   LEFT JOIN tasks d ON d.id = dep.id
                   WHERE d.id IS NULL OR d.status NOT IN ('completed', 'cancelled')
               )
             ORDER BY CASE t.priority
                          WHEN 'critical' THEN 4
                          WHEN 'high' THEN 3
                          WHEN 'medium' THEN 2
                          ELSE 1
                      END DESC,
                      t.created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn delete_by_pr(&self, pr_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE pr_id = $1")
            .bind(pr_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkflowExecRepo for PostgresStore {
    #[instrument(skip(self, input), fields(workflow_name = %input.workflow_name))]
    async fn create(&self, input: NewWorkflowExecution) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO workflow_executions (id, pr_id, workflow_name, status, metadata)
             VALUES ($1, $2, $3, 'active', $4)
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(input.pr_id)
        .bind(&input.workflow_name)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        execution_from_row(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| execution_from_row(&r)).transpose()
    }

    async fn get_latest_by_pr(
        &self,
        pr_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions
             WHERE pr_id = $1
             ORDER BY started_at DESC
             LIMIT 1"
        ))
        .bind(pr_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| execution_from_row(&r)).transpose()
    }

    async fn add_completed_step(
        &self,
        id: Uuid,
        step_id: &str,
        next_step_hint: Option<&str>,
    ) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE workflow_executions
             SET steps_completed = CASE
                     WHEN $2 = ANY(steps_completed) THEN steps_completed
                     ELSE array_append(steps_completed, $2)
                 END,
                 current_step = $3
             WHERE id = $1
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(id)
        .bind(step_id)
        .bind(next_step_hint)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("workflow execution", id))?;

        execution_from_row(&row)
    }

    async fn add_failed_step(
        &self,
        id: Uuid,
        step_id: &str,
    ) -> Result<WorkflowExecution, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE workflow_executions
             SET steps_failed = CASE
                     WHEN $2 = ANY(steps_failed) THEN steps_failed
                     ELSE array_append(steps_failed, $2)
                 END
             WHERE id = $1
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(id)
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("workflow execution", id))?;

        execution_from_row(&row)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Completed).await
    }

    async fn mark_failed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Failed).await
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Cancelled).await
    }
}

impl PostgresStore {
    async fn mark_terminal(
        &self,
        id: Uuid,
        status: WorkflowExecutionStatus,
    ) -> Result<WorkflowExecution, StoreError> {
        // Guarded on 'active' so a terminal transition happens exactly once
        let row = sqlx::query(&format!(
            "UPDATE workflow_executions
             SET status = $2, completed_at = NOW()
             WHERE id = $1 AND status = 'active'
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => execution_from_row(&row),
            // Already terminal: return the row unchanged
            None => WorkflowExecRepo::get_by_id(self, id)
                .await?
                .ok_or_else(|| StoreError::not_found("workflow execution", id)),
        }
    }
}

#[async_trait]
impl MilestoneRepo for PostgresStore {
    #[instrument(skip(self, milestone), fields(milestone_id = %milestone.id))]
    async fn register(&self, milestone: Milestone) -> Result<Milestone, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO milestones (id, name, workflow_id, parent_id, weight,
                                     expected_completion_time_ms, dependencies)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&milestone.id)
        .bind(&milestone.name)
        .bind(&milestone.workflow_id)
        .bind(&milestone.parent_id)
        .bind(milestone.weight)
        .bind(
            milestone
                .expected_completion_time
                .map(|d| d.as_millis() as i64),
        )
        .bind(&milestone.dependencies)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::conflict("milestone", &milestone.id)
            } else {
                e.into()
            }
        })?;

        sqlx::query("INSERT INTO milestone_states (milestone_id) VALUES ($1)")
            .bind(&milestone.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(milestone)
    }

    async fn get(&self, id: &str) -> Result<Option<Milestone>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, workflow_id, parent_id, weight, expected_completion_time_ms,
                    dependencies
             FROM milestones WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| milestone_from_row(&r)))
    }

    async fn state_get(&self, id: &str) -> Result<Option<MilestoneState>, StoreError> {
        let row = sqlx::query(
            "SELECT status, started_at, completed_at, percent_complete, blocker_reason, blocked_by
             FROM milestone_states WHERE milestone_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| milestone_state_from_row(&r)).transpose()
    }

    async fn state_set(
        &self,
        id: &str,
        state: MilestoneState,
    ) -> Result<MilestoneState, StoreError> {
        let result = sqlx::query(
            "UPDATE milestone_states
             SET status = $2, started_at = $3, completed_at = $4, percent_complete = $5,
                 blocker_reason = $6, blocked_by = $7
             WHERE milestone_id = $1",
        )
        .bind(id)
        .bind(state.status.as_str())
        .bind(state.started_at)
        .bind(state.completed_at)
        .bind(state.percent_complete)
        .bind(&state.blocker_reason)
        .bind(&state.blocked_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("milestone", id));
        }
        Ok(state)
    }

    async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Milestone>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, workflow_id, parent_id, weight, expected_completion_time_ms,
                    dependencies
             FROM milestones WHERE workflow_id = $1 ORDER BY id ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(milestone_from_row).collect())
    }

    async fn states_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(Milestone, MilestoneState)>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.id, m.name, m.workflow_id, m.parent_id, m.weight,
                    m.expected_completion_time_ms, m.dependencies,
                    s.status, s.started_at, s.completed_at, s.percent_complete,
                    s.blocker_reason, s.blocked_by
             FROM milestones m
             JOIN milestone_states s ON s.milestone_id = m.id
             WHERE m.workflow_id = $1
             ORDER BY m.id ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| Ok((milestone_from_row(r), milestone_state_from_row(r)?)))
            .collect()
    }
}

#[async_trait]
impl BlockerRepo for PostgresStore {
    #[instrument(skip(self, blocker), fields(blocker_id = %blocker.id))]
    async fn create(&self, blocker: Blocker) -> Result<Blocker, StoreError> {
        sqlx::query(
            "INSERT INTO blockers (id, workflow_id, affected_milestone_ids, severity,
                                   description, blocked_by, detected_at, resolved_at,
                                   resolution, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(blocker.id)
        .bind(&blocker.workflow_id)
        .bind(&blocker.affected_milestone_ids)
        .bind(blocker.severity.as_str())
        .bind(&blocker.description)
        .bind(&blocker.blocked_by)
        .bind(blocker.detected_at)
        .bind(blocker.resolved_at)
        .bind(&blocker.resolution)
        .bind(&blocker.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::conflict("blocker", blocker.id)
            } else {
                e.into()
            }
        })?;

        Ok(blocker)
    }

    async fn resolve(&self, id: Uuid, resolution: Option<&str>) -> Result<Blocker, StoreError> {
        // Only an active blocker is stamped; resolving twice returns the
        // stored row unchanged
        let row = sqlx::query(&format!(
            "UPDATE blockers
             SET resolved_at = NOW(), resolution = $2
             WHERE id = $1 AND resolved_at IS NULL
             RETURNING {BLOCKER_COLUMNS}"
        ))
        .bind(id)
        .bind(resolution)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => blocker_from_row(&row),
            None => {
                let row = sqlx::query(&format!("SELECT {BLOCKER_COLUMNS} FROM blockers WHERE id = $1"))
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| StoreError::not_found("blocker", id))?;
                blocker_from_row(&row)
            }
        }
    }

    async fn list_active(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCKER_COLUMNS} FROM blockers
             WHERE workflow_id = $1 AND resolved_at IS NULL
             ORDER BY detected_at ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(blocker_from_row).collect()
    }

    async fn list_all(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCKER_COLUMNS} FROM blockers
             WHERE workflow_id = $1
             ORDER BY detected_at ASC"
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(blocker_from_row).collect()
    }
}

#[async_trait]
impl CorrelationRepo for PostgresStore {
    async fn upsert(&self, input: NewCorrelation) -> Result<Correlation, StoreError> {
        let row = sqlx::query(
            "INSERT INTO correlations (id, linear_issue_id, pr_id, task_id,
                                       workflow_execution_id)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (linear_issue_id) DO UPDATE
             SET pr_id = COALESCE(EXCLUDED.pr_id, correlations.pr_id),
                 task_id = COALESCE(EXCLUDED.task_id, correlations.task_id),
                 workflow_execution_id = COALESCE(EXCLUDED.workflow_execution_id,
                                                  correlations.workflow_execution_id),
                 updated_at = NOW()
             RETURNING id, linear_issue_id, pr_id, task_id, workflow_execution_id,
                       created_at, updated_at",
        )
        .bind(Uuid::now_v7())
        .bind(&input.linear_issue_id)
        .bind(input.pr_id)
        .bind(input.task_id)
        .bind(input.workflow_execution_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(correlation_from_row(&row))
    }

    async fn get_by_linear_issue(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<Correlation>, StoreError> {
        let row = sqlx::query(
            "SELECT id, linear_issue_id, pr_id, task_id, workflow_execution_id,
                    created_at, updated_at
             FROM correlations WHERE linear_issue_id = $1",
        )
        .bind(linear_issue_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| correlation_from_row(&r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Full coverage lives in the DATABASE_URL-gated integration test;
    // these exercise the row-mapping helpers without a database.

    #[test]
    fn test_parse_enum_errors_are_serialization() {
        let result: Result<TaskStatus, _> = parse_enum("bogus", "task status");
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_column_lists_are_consistent() {
        for column in ["started_at", "completed_at", "priority"] {
            assert!(TASK_COLUMNS.contains(column));
        }
        for column in ["steps_completed", "steps_failed", "current_step"] {
            assert!(EXECUTION_COLUMNS.contains(column));
        }
        assert!(BLOCKER_COLUMNS.contains("affected_milestone_ids"));
        assert!(PR_COLUMNS.contains("analysis_status"));
    }
}
