//! Repository trait definitions
//!
//! These contracts are the only storage surface the engine sees.
//! Implementations must be thread-safe and guarantee the timestamp
//! stamping documented on [`TaskRepo::update_status`] and the
//! exactly-once terminal transitions on [`WorkflowExecRepo`].

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use mergeflow_core::model::{
    AnalysisStatus, Blocker, Correlation, Milestone, MilestoneState, NewTask, PrEventData,
    PrStatus, Project, PullRequest, Task, TaskStatus, WorkflowExecution,
};

use crate::error::StoreError;

/// Input for creating a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub repository_id: String,
    pub name: String,
}

/// Input for creating a workflow execution
#[derive(Debug, Clone)]
pub struct NewWorkflowExecution {
    pub pr_id: Uuid,
    pub workflow_name: String,
    pub metadata: serde_json::Value,
}

/// Input for upserting a correlation link
#[derive(Debug, Clone)]
pub struct NewCorrelation {
    pub linear_issue_id: String,
    pub pr_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub workflow_execution_id: Option<Uuid>,
}

/// Projects keyed by forge repository id
#[async_trait]
pub trait ProjectRepo: Send + Sync + 'static {
    async fn get_by_repository_id(
        &self,
        repository_id: &str,
    ) -> Result<Option<Project>, StoreError>;

    /// Fails with `Conflict` when the repository id is already tracked
    async fn create(&self, input: NewProject) -> Result<Project, StoreError>;

    async fn update(&self, id: Uuid, name: &str) -> Result<Project, StoreError>;
}

/// Pull requests, unique on `(project_id, pr_number)`
#[async_trait]
pub trait PrRepo: Send + Sync + 'static {
    /// Returns the existing row or creates one from the event payload
    async fn get_or_create(
        &self,
        project_id: Uuid,
        pr_number: i64,
        data: &PrEventData,
    ) -> Result<PullRequest, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PullRequest>, StoreError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: PrStatus,
        analysis_status: Option<AnalysisStatus>,
    ) -> Result<PullRequest, StoreError>;
}

/// Canonical task rows
#[async_trait]
pub trait TaskRepo: Send + Sync + 'static {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    async fn get_by_pr(&self, pr_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Transition a task's status, stamping timestamps atomically:
    /// `started_at = now` on the first transition to running,
    /// `completed_at = now` on completed/failed, and on cancelled only
    /// when the task had already started.
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError>;

    /// Every pending task whose dependencies are all completed or
    /// cancelled; ordered by priority DESC, then created_at ASC
    async fn get_runnable(&self) -> Result<Vec<Task>, StoreError>;

    /// Cascade helper; returns the number of rows removed
    async fn delete_by_pr(&self, pr_id: Uuid) -> Result<u64, StoreError>;
}

/// Workflow execution rows
#[async_trait]
pub trait WorkflowExecRepo: Send + Sync + 'static {
    async fn create(&self, input: NewWorkflowExecution) -> Result<WorkflowExecution, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Latest execution for a pull request, by start time
    async fn get_latest_by_pr(&self, pr_id: Uuid)
        -> Result<Option<WorkflowExecution>, StoreError>;

    /// Append to `steps_completed` (insertion-ordered, idempotent per
    /// step id) and optionally update the `current_step` hint
    async fn add_completed_step(
        &self,
        id: Uuid,
        step_id: &str,
        next_step_hint: Option<&str>,
    ) -> Result<WorkflowExecution, StoreError>;

    async fn add_failed_step(&self, id: Uuid, step_id: &str)
        -> Result<WorkflowExecution, StoreError>;

    /// Terminal transitions happen at most once; marking an already
    /// terminal execution returns the row unchanged
    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;

    async fn mark_failed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;

    async fn mark_cancelled(&self, id: Uuid) -> Result<WorkflowExecution, StoreError>;
}

/// Milestones and their states; exactly one state row per milestone
#[async_trait]
pub trait MilestoneRepo: Send + Sync + 'static {
    /// Fails with `Conflict` on a duplicate milestone id
    async fn register(&self, milestone: Milestone) -> Result<Milestone, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Milestone>, StoreError>;

    async fn state_get(&self, id: &str) -> Result<Option<MilestoneState>, StoreError>;

    /// Replace the state of a registered milestone
    async fn state_set(&self, id: &str, state: MilestoneState)
        -> Result<MilestoneState, StoreError>;

    async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Milestone>, StoreError>;

    async fn states_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(Milestone, MilestoneState)>, StoreError>;
}

/// Blockers referencing milestones by id
#[async_trait]
pub trait BlockerRepo: Send + Sync + 'static {
    /// Fails with `Conflict` on a duplicate blocker id
    async fn create(&self, blocker: Blocker) -> Result<Blocker, StoreError>;

    /// Idempotent: resolving an already-resolved blocker returns the
    /// stored row unchanged
    async fn resolve(&self, id: Uuid, resolution: Option<&str>) -> Result<Blocker, StoreError>;

    async fn list_active(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError>;

    async fn list_all(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError>;
}

/// Cross-system correlation links, upserted by natural key
#[async_trait]
pub trait CorrelationRepo: Send + Sync + 'static {
    async fn upsert(&self, input: NewCorrelation) -> Result<Correlation, StoreError>;

    async fn get_by_linear_issue(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<Correlation>, StoreError>;
}

/// The repository bundle handed to the engine and orchestrator
#[derive(Clone)]
pub struct Stores {
    pub projects: Arc<dyn ProjectRepo>,
    pub prs: Arc<dyn PrRepo>,
    pub tasks: Arc<dyn TaskRepo>,
    pub executions: Arc<dyn WorkflowExecRepo>,
    pub milestones: Arc<dyn MilestoneRepo>,
    pub blockers: Arc<dyn BlockerRepo>,
    pub correlations: Arc<dyn CorrelationRepo>,
}

impl Stores {
    /// All repositories backed by one in-memory store
    pub fn in_memory() -> Self {
        let store = Arc::new(crate::memory::InMemoryStore::new());
        Self::from_arc(store)
    }

    /// All repositories backed by one PostgreSQL pool
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(crate::postgres::PostgresStore::new(pool));
        Self::from_arc(store)
    }

    fn from_arc<S>(store: Arc<S>) -> Self
    where
        S: ProjectRepo
            + PrRepo
            + TaskRepo
            + WorkflowExecRepo
            + MilestoneRepo
            + BlockerRepo
            + CorrelationRepo,
    {
        Self {
            projects: store.clone(),
            prs: store.clone(),
            tasks: store.clone(),
            executions: store.clone(),
            milestones: store.clone(),
            blockers: store.clone(),
            correlations: store,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
