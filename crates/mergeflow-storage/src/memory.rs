//! In-memory implementation of the repository contracts
//!
//! Primarily for tests and default wiring. Semantics match the
//! PostgreSQL implementation, including timestamp stamping and
//! exactly-once terminal transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use mergeflow_core::model::{
    AnalysisStatus, Blocker, Correlation, Milestone, MilestoneState, NewTask, PrEventData,
    PrStatus, Project, PullRequest, Task, TaskStatus, WorkflowExecution, WorkflowExecutionStatus,
};

use crate::error::StoreError;
use crate::repos::*;

/// In-memory store implementing every repository trait
///
/// # Example
///
/// ```
/// use mergeflow_storage::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.task_count(), 0);
/// ```
pub struct InMemoryStore {
    projects: RwLock<HashMap<Uuid, Project>>,
    prs: RwLock<HashMap<Uuid, PullRequest>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    milestones: RwLock<HashMap<String, Milestone>>,
    milestone_states: RwLock<HashMap<String, MilestoneState>>,
    blockers: RwLock<HashMap<Uuid, Blocker>>,
    correlations: RwLock<HashMap<String, Correlation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            prs: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            milestones: RwLock::new(HashMap::new()),
            milestone_states: RwLock::new(HashMap::new()),
            blockers: RwLock::new(HashMap::new()),
            correlations: RwLock::new(HashMap::new()),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn milestone_count(&self) -> usize {
        self.milestones.read().len()
    }

    /// Clear all collections (for testing)
    pub fn clear(&self) {
        self.projects.write().clear();
        self.prs.write().clear();
        self.tasks.write().clear();
        self.executions.write().clear();
        self.milestones.write().clear();
        self.milestone_states.write().clear();
        self.blockers.write().clear();
        self.correlations.write().clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectRepo for InMemoryStore {
    async fn get_by_repository_id(
        &self,
        repository_id: &str,
    ) -> Result<Option<Project>, StoreError> {
        let projects = self.projects.read();
        Ok(projects
            .values()
            .find(|p| p.repository_id == repository_id)
            .cloned())
    }

    async fn create(&self, input: NewProject) -> Result<Project, StoreError> {
        let mut projects = self.projects.write();
        if projects
            .values()
            .any(|p| p.repository_id == input.repository_id)
        {
            return Err(StoreError::conflict("project", &input.repository_id));
        }

        let now = Utc::now();
        let project = Project {
            id: Uuid::now_v7(),
            repository_id: input.repository_id,
            name: input.name,
            created_at: now,
            updated_at: now,
        };
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn update(&self, id: Uuid, name: &str) -> Result<Project, StoreError> {
        let mut projects = self.projects.write();
        let project = projects
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("project", id))?;
        project.name = name.to_string();
        project.updated_at = Utc::now();
        Ok(project.clone())
    }
}

#[async_trait]
impl PrRepo for InMemoryStore {
    async fn get_or_create(
        &self,
        project_id: Uuid,
        pr_number: i64,
        data: &PrEventData,
    ) -> Result<PullRequest, StoreError> {
        let mut prs = self.prs.write();
        if let Some(existing) = prs
            .values()
            .find(|pr| pr.project_id == project_id && pr.pr_number == pr_number)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let pr = PullRequest {
            id: Uuid::now_v7(),
            project_id,
            pr_number,
            title: data.title.clone(),
            description: data.description.clone(),
            author: data.author.clone(),
            status: data.status,
            analysis_status: AnalysisStatus::Pending,
            base_branch: data.base_branch.clone(),
            head_branch: data.head_branch.clone(),
            created_at: now,
            updated_at: now,
        };
        prs.insert(pr.id, pr.clone());
        Ok(pr)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<PullRequest>, StoreError> {
        Ok(self.prs.read().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: PrStatus,
        analysis_status: Option<AnalysisStatus>,
    ) -> Result<PullRequest, StoreError> {
        let mut prs = self.prs.write();
        let pr = prs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("pr", id))?;
        pr.status = status;
        if let Some(analysis) = analysis_status {
            pr.analysis_status = analysis;
        }
        pr.updated_at = Utc::now();
        Ok(pr.clone())
    }
}

#[async_trait]
impl TaskRepo for InMemoryStore {
    async fn create(&self, input: NewTask) -> Result<Task, StoreError> {
        let task = Task {
            id: Uuid::now_v7(),
            pr_id: input.pr_id,
            name: input.name,
            description: input.description,
            task_type: input.task_type,
            dependencies: input.dependencies,
            status: TaskStatus::Pending,
            priority: input.priority,
            metadata: input.metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.tasks.write().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn get_by_pr(&self, pr_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read();
        let mut result: Vec<Task> = tasks.values().filter(|t| t.pr_id == pr_id).cloned().collect();
        result.sort_by_key(|t| t.created_at);
        Ok(result)
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("task", id))?;

        let now = Utc::now();
        match status {
            TaskStatus::Running => {
                if task.started_at.is_none() {
                    task.started_at = Some(now);
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                task.completed_at = Some(now);
            }
            TaskStatus::Cancelled => {
                // A task cancelled before it ever started has no span to close
                if task.started_at.is_some() {
                    task.completed_at = Some(now);
                }
            }
            TaskStatus::Pending => {}
        }
        task.status = status;
        Ok(task.clone())
    }

    async fn get_runnable(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read();
        let mut runnable: Vec<Task> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().all(|dep| {
                        tasks
                            .get(dep)
                            .map(|d| d.status.satisfies_dependency())
                            .unwrap_or(false)
                    })
            })
            .cloned()
            .collect();

        runnable.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(runnable)
    }

    async fn delete_by_pr(&self, pr_id: Uuid) -> Result<u64, StoreError> {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, t| t.pr_id != pr_id);
        Ok((before - tasks.len()) as u64)
    }
}

#[async_trait]
impl WorkflowExecRepo for InMemoryStore {
    async fn create(&self, input: NewWorkflowExecution) -> Result<WorkflowExecution, StoreError> {
        let execution = WorkflowExecution {
            id: Uuid::now_v7(),
            pr_id: input.pr_id,
            workflow_name: input.workflow_name,
            status: WorkflowExecutionStatus::Active,
            current_step: None,
            steps_completed: vec![],
            steps_failed: vec![],
            metadata: input.metadata,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.executions.write().insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn get_latest_by_pr(
        &self,
        pr_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        let executions = self.executions.read();
        Ok(executions
            .values()
            .filter(|e| e.pr_id == pr_id)
            .max_by_key(|e| e.started_at)
            .cloned())
    }

    async fn add_completed_step(
        &self,
        id: Uuid,
        step_id: &str,
        next_step_hint: Option<&str>,
    ) -> Result<WorkflowExecution, StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("workflow execution", id))?;

        if !execution.steps_completed.iter().any(|s| s == step_id) {
            execution.steps_completed.push(step_id.to_string());
        }
        execution.current_step = next_step_hint.map(str::to_string);
        Ok(execution.clone())
    }

    async fn add_failed_step(
        &self,
        id: Uuid,
        step_id: &str,
    ) -> Result<WorkflowExecution, StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("workflow execution", id))?;

        if !execution.steps_failed.iter().any(|s| s == step_id) {
            execution.steps_failed.push(step_id.to_string());
        }
        Ok(execution.clone())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Completed)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Failed)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<WorkflowExecution, StoreError> {
        self.mark_terminal(id, WorkflowExecutionStatus::Cancelled)
    }
}

impl InMemoryStore {
    fn mark_terminal(
        &self,
        id: Uuid,
        status: WorkflowExecutionStatus,
    ) -> Result<WorkflowExecution, StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("workflow execution", id))?;

        // Terminal transitions happen exactly once
        if execution.is_terminal() {
            return Ok(execution.clone());
        }

        execution.status = status;
        execution.completed_at = Some(Utc::now());
        Ok(execution.clone())
    }
}

#[async_trait]
impl MilestoneRepo for InMemoryStore {
    async fn register(&self, milestone: Milestone) -> Result<Milestone, StoreError> {
        let mut milestones = self.milestones.write();
        if milestones.contains_key(&milestone.id) {
            return Err(StoreError::conflict("milestone", &milestone.id));
        }

        milestones.insert(milestone.id.clone(), milestone.clone());
        self.milestone_states
            .write()
            .insert(milestone.id.clone(), MilestoneState::default());
        Ok(milestone)
    }

    async fn get(&self, id: &str) -> Result<Option<Milestone>, StoreError> {
        Ok(self.milestones.read().get(id).cloned())
    }

    async fn state_get(&self, id: &str) -> Result<Option<MilestoneState>, StoreError> {
        Ok(self.milestone_states.read().get(id).cloned())
    }

    async fn state_set(
        &self,
        id: &str,
        state: MilestoneState,
    ) -> Result<MilestoneState, StoreError> {
        if !self.milestones.read().contains_key(id) {
            return Err(StoreError::not_found("milestone", id));
        }
        self.milestone_states
            .write()
            .insert(id.to_string(), state.clone());
        Ok(state)
    }

    async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<Milestone>, StoreError> {
        let milestones = self.milestones.read();
        let mut result: Vec<Milestone> = milestones
            .values()
            .filter(|m| m.workflow_id == workflow_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn states_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(Milestone, MilestoneState)>, StoreError> {
        let milestones = self.list_by_workflow(workflow_id).await?;
        let states = self.milestone_states.read();
        Ok(milestones
            .into_iter()
            .map(|m| {
                let state = states.get(&m.id).cloned().unwrap_or_default();
                (m, state)
            })
            .collect())
    }
}

#[async_trait]
impl BlockerRepo for InMemoryStore {
    async fn create(&self, blocker: Blocker) -> Result<Blocker, StoreError> {
        let mut blockers = self.blockers.write();
        if blockers.contains_key(&blocker.id) {
            return Err(StoreError::conflict("blocker", blocker.id));
        }
        blockers.insert(blocker.id, blocker.clone());
        Ok(blocker)
    }

    async fn resolve(&self, id: Uuid, resolution: Option<&str>) -> Result<Blocker, StoreError> {
        let mut blockers = self.blockers.write();
        let blocker = blockers
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("blocker", id))?;

        if blocker.resolved_at.is_some() {
            return Ok(blocker.clone());
        }

        blocker.resolved_at = Some(Utc::now());
        blocker.resolution = resolution.map(str::to_string);
        Ok(blocker.clone())
    }

    async fn list_active(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError> {
        let blockers = self.blockers.read();
        let mut result: Vec<Blocker> = blockers
            .values()
            .filter(|b| b.workflow_id == workflow_id && b.is_active())
            .cloned()
            .collect();
        result.sort_by_key(|b| b.detected_at);
        Ok(result)
    }

    async fn list_all(&self, workflow_id: &str) -> Result<Vec<Blocker>, StoreError> {
        let blockers = self.blockers.read();
        let mut result: Vec<Blocker> = blockers
            .values()
            .filter(|b| b.workflow_id == workflow_id)
            .cloned()
            .collect();
        result.sort_by_key(|b| b.detected_at);
        Ok(result)
    }
}

#[async_trait]
impl CorrelationRepo for InMemoryStore {
    async fn upsert(&self, input: NewCorrelation) -> Result<Correlation, StoreError> {
        let mut correlations = self.correlations.write();
        let now = Utc::now();

        let correlation = match correlations.get_mut(&input.linear_issue_id) {
            Some(existing) => {
                existing.pr_id = input.pr_id.or(existing.pr_id);
                existing.task_id = input.task_id.or(existing.task_id);
                existing.workflow_execution_id =
                    input.workflow_execution_id.or(existing.workflow_execution_id);
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = Correlation {
                    id: Uuid::now_v7(),
                    linear_issue_id: input.linear_issue_id.clone(),
                    pr_id: input.pr_id,
                    task_id: input.task_id,
                    workflow_execution_id: input.workflow_execution_id,
                    created_at: now,
                    updated_at: now,
                };
                correlations.insert(input.linear_issue_id.clone(), created.clone());
                created
            }
        };
        Ok(correlation)
    }

    async fn get_by_linear_issue(
        &self,
        linear_issue_id: &str,
    ) -> Result<Option<Correlation>, StoreError> {
        Ok(self.correlations.read().get(linear_issue_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repos::Stores;
    use mergeflow_core::model::{StepType, TaskPriority};

    fn new_task(pr_id: Uuid, priority: TaskPriority, deps: Vec<Uuid>) -> NewTask {
        NewTask {
            pr_id,
            name: "task".to_string(),
            description: String::new(),
            task_type: StepType::Analysis,
            dependencies: deps,
            priority,
            metadata: serde_json::Value::Null,
        }
    }

    fn new_execution(pr_id: Uuid) -> NewWorkflowExecution {
        NewWorkflowExecution {
            pr_id,
            workflow_name: "pr_analysis".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    fn pr_event() -> PrEventData {
        PrEventData {
            pr_id: None,
            title: "Add retry".to_string(),
            description: None,
            author: "dev".to_string(),
            status: PrStatus::Open,
            base_branch: "main".to_string(),
            head_branch: "feat/retry".to_string(),
        }
    }

    #[tokio::test]
    async fn test_project_unique_repository_id() {
        let stores = Stores::in_memory();
        stores
            .projects
            .create(NewProject {
                repository_id: "repo-1".to_string(),
                name: "Repo".to_string(),
            })
            .await
            .unwrap();

        let duplicate = stores
            .projects
            .create(NewProject {
                repository_id: "repo-1".to_string(),
                name: "Other".to_string(),
            })
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_pr_get_or_create_is_idempotent() {
        let stores = Stores::in_memory();
        let project_id = Uuid::now_v7();

        let first = stores.prs.get_or_create(project_id, 7, &pr_event()).await.unwrap();
        let second = stores.prs.get_or_create(project_id, 7, &pr_event()).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_task_status_stamping() {
        let stores = Stores::in_memory();
        let task = stores
            .tasks
            .create(new_task(Uuid::now_v7(), TaskPriority::High, vec![]))
            .await
            .unwrap();
        assert!(task.started_at.is_none());

        let running = stores
            .tasks
            .update_status(task.id, TaskStatus::Running)
            .await
            .unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = stores
            .tasks
            .update_status(task.id, TaskStatus::Completed)
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_has_no_completed_at() {
        let stores = Stores::in_memory();
        let task = stores
            .tasks
            .create(new_task(Uuid::now_v7(), TaskPriority::Low, vec![]))
            .await
            .unwrap();

        let cancelled = stores
            .tasks
            .update_status(task.id, TaskStatus::Cancelled)
            .await
            .unwrap();
        assert!(cancelled.started_at.is_none());
        assert!(cancelled.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_get_runnable_respects_dependencies_and_order() {
        let stores = Stores::in_memory();
        let pr_id = Uuid::now_v7();

        let a = stores
            .tasks
            .create(new_task(pr_id, TaskPriority::Medium, vec![]))
            .await
            .unwrap();
        let b = stores
            .tasks
            .create(new_task(pr_id, TaskPriority::Critical, vec![a.id]))
            .await
            .unwrap();
        let c = stores
            .tasks
            .create(new_task(pr_id, TaskPriority::High, vec![]))
            .await
            .unwrap();

        // b is blocked on a; runnable = [c (high), a (medium)]
        let runnable = stores.tasks.get_runnable().await.unwrap();
        let ids: Vec<Uuid> = runnable.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![c.id, a.id]);

        // Completing a unblocks b, which outranks everything
        stores
            .tasks
            .update_status(a.id, TaskStatus::Completed)
            .await
            .unwrap();
        let runnable = stores.tasks.get_runnable().await.unwrap();
        assert_eq!(runnable[0].id, b.id);
    }

    #[tokio::test]
    async fn test_cancelled_dependency_satisfies() {
        let stores = Stores::in_memory();
        let pr_id = Uuid::now_v7();

        let a = stores
            .tasks
            .create(new_task(pr_id, TaskPriority::Medium, vec![]))
            .await
            .unwrap();
        let b = stores
            .tasks
            .create(new_task(pr_id, TaskPriority::Medium, vec![a.id]))
            .await
            .unwrap();

        stores
            .tasks
            .update_status(a.id, TaskStatus::Cancelled)
            .await
            .unwrap();
        let runnable = stores.tasks.get_runnable().await.unwrap();
        assert!(runnable.iter().any(|t| t.id == b.id));
    }

    #[tokio::test]
    async fn test_execution_terminal_exactly_once() {
        let stores = Stores::in_memory();
        let execution = stores
            .executions
            .create(new_execution(Uuid::now_v7()))
            .await
            .unwrap();

        let failed = stores.executions.mark_failed(execution.id).await.unwrap();
        assert_eq!(failed.status, WorkflowExecutionStatus::Failed);
        let first_completed_at = failed.completed_at;

        // A second terminal transition is a no-op
        let still_failed = stores.executions.mark_completed(execution.id).await.unwrap();
        assert_eq!(still_failed.status, WorkflowExecutionStatus::Failed);
        assert_eq!(still_failed.completed_at, first_completed_at);
    }

    #[tokio::test]
    async fn test_add_completed_step_idempotent_and_ordered() {
        let stores = Stores::in_memory();
        let execution = stores
            .executions
            .create(new_execution(Uuid::now_v7()))
            .await
            .unwrap();

        stores
            .executions
            .add_completed_step(execution.id, "a", Some("b"))
            .await
            .unwrap();
        stores
            .executions
            .add_completed_step(execution.id, "a", Some("b"))
            .await
            .unwrap();
        let updated = stores
            .executions
            .add_completed_step(execution.id, "b", None)
            .await
            .unwrap();

        assert_eq!(updated.steps_completed, vec!["a", "b"]);
        assert_eq!(updated.current_step, None);
    }

    #[tokio::test]
    async fn test_milestone_register_conflict() {
        let stores = Stores::in_memory();
        let milestone = Milestone::new("m-1", "Setup", "wf-1", 50.0);

        stores.milestones.register(milestone.clone()).await.unwrap();
        let duplicate = stores.milestones.register(milestone).await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_milestone_state_default_and_set() {
        let stores = Stores::in_memory();
        stores
            .milestones
            .register(Milestone::new("m-1", "Setup", "wf-1", 50.0))
            .await
            .unwrap();

        let state = stores.milestones.state_get("m-1").await.unwrap().unwrap();
        assert_eq!(state.status, mergeflow_core::MilestoneStatus::NotStarted);

        let mut updated = state;
        updated.transition(mergeflow_core::MilestoneStatus::InProgress, Utc::now());
        stores
            .milestones
            .state_set("m-1", updated.clone())
            .await
            .unwrap();

        let fetched = stores.milestones.state_get("m-1").await.unwrap().unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn test_blocker_resolve_idempotent() {
        let stores = Stores::in_memory();
        let blocker = Blocker::auto_detected("wf-1", "m-1", "stuck", "deps");
        let id = blocker.id;
        stores.blockers.create(blocker).await.unwrap();

        let first = stores.blockers.resolve(id, Some("unblocked")).await.unwrap();
        let second = stores
            .blockers
            .resolve(id, Some("different text"))
            .await
            .unwrap();

        assert_eq!(first.resolved_at, second.resolved_at);
        assert_eq!(second.resolution.as_deref(), Some("unblocked"));
        assert!(stores.blockers.list_active("wf-1").await.unwrap().is_empty());
        assert_eq!(stores.blockers.list_all("wf-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_correlation_upsert_by_natural_key() {
        let stores = Stores::in_memory();
        let pr_id = Uuid::now_v7();
        let task_id = Uuid::now_v7();

        let first = stores
            .correlations
            .upsert(NewCorrelation {
                linear_issue_id: "LIN-42".to_string(),
                pr_id: Some(pr_id),
                task_id: None,
                workflow_execution_id: None,
            })
            .await
            .unwrap();

        let second = stores
            .correlations
            .upsert(NewCorrelation {
                linear_issue_id: "LIN-42".to_string(),
                pr_id: None,
                task_id: Some(task_id),
                workflow_execution_id: None,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.pr_id, Some(pr_id));
        assert_eq!(second.task_id, Some(task_id));
    }
}
