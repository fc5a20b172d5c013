//! Workflow engine: instantiation, dispatch, execution, reconciliation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use mergeflow_core::model::{
    Milestone, MilestoneStatus, NewTask, Task, TaskPriority, TaskStatus, WorkflowDefinition,
    WorkflowExecution, WorkflowStep,
};
use mergeflow_core::{
    EventBus, OrchestrationError, OrchestrationEvent, OrchestratorConfig, Result,
};
use mergeflow_queue::{QueuedTask, TaskQueue};
use mergeflow_storage::{NewWorkflowExecution, Stores};

use crate::dag::MilestoneService;
use crate::txn::{Operation, TransactionManager};

use super::executor::{ExecutorRegistry, StepContext, StepExecutor, StepOutcome};
use super::handlers::{HandlerRegistry, WorkflowEventHandler};

/// Outcome of one `execute_task` call, as seen by the worker loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
    /// Step executed and the task completed
    Completed,

    /// Step failed (executor error, `success = false`, missing executor,
    /// or step timeout); recorded canonically on the task row
    Failed(String),

    /// Nothing to do: the task was not pending, its execution is
    /// terminal, or another worker holds the in-flight guard
    Skipped,
}

/// The workflow engine
///
/// Translates workflow definitions into tasks, dispatches runnable tasks
/// into the queue, invokes step executors, and reconciles outcomes. All
/// canonical state lives behind [`Stores`]; registries are append-only
/// after initialization.
pub struct WorkflowEngine {
    stores: Stores,
    queue: Arc<dyn TaskQueue>,
    bus: Arc<EventBus>,
    milestones: Arc<MilestoneService>,
    txns: Arc<TransactionManager>,
    config: OrchestratorConfig,

    executors: ExecutorRegistry,
    handlers: HandlerRegistry,
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,

    /// At-most-one concurrent executor invocation per task id
    in_flight: Mutex<HashSet<Uuid>>,

    /// Serializes completion reconciliation per execution
    finalizing: Mutex<HashSet<Uuid>>,
}

struct SetGuard<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> SetGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Option<Self> {
        if set.lock().insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for SetGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl WorkflowEngine {
    pub fn new(
        stores: Stores,
        queue: Arc<dyn TaskQueue>,
        bus: Arc<EventBus>,
        milestones: Arc<MilestoneService>,
        txns: Arc<TransactionManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            stores,
            queue,
            bus,
            milestones,
            txns,
            config,
            executors: ExecutorRegistry::new(),
            handlers: HandlerRegistry::new(),
            definitions: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            finalizing: Mutex::new(HashSet::new()),
        }
    }

    /// Register a workflow definition after validating its invariants
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;

        let mut definitions = self.definitions.write();
        if definitions.contains_key(&definition.name) {
            return Err(OrchestrationError::conflict("workflow", &definition.name));
        }
        info!(workflow = %definition.name, version = %definition.version, "registered workflow");
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.definitions.read().get(name).cloned()
    }

    /// Names of registered workflows whose triggers fire for an event,
    /// sorted for deterministic start order
    pub fn matching_definitions(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Vec<String> {
        let definitions = self.definitions.read();
        let mut names: Vec<String> = definitions
            .values()
            .filter(|d| d.matches_event(event_type, payload))
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn register_executor(
        &self,
        step_type: mergeflow_core::StepType,
        executor: Arc<dyn StepExecutor>,
    ) {
        self.executors.register(step_type, executor);
    }

    pub fn register_handler(&self, handler: Arc<dyn WorkflowEventHandler>) {
        self.handlers.register(handler);
    }

    /// Start a workflow for one pull request
    ///
    /// Creates the execution, materializes one task per step (translating
    /// step dependencies to task ids), mirrors the steps as milestones,
    /// emits `workflow_started`, and runs a dispatch pass.
    #[instrument(skip(self, variables), fields(workflow = workflow_name))]
    pub async fn start(
        &self,
        pr_id: Uuid,
        project_id: Uuid,
        workflow_name: &str,
        variables: serde_json::Value,
    ) -> Result<WorkflowExecution> {
        let definition = self
            .definition(workflow_name)
            .ok_or_else(|| OrchestrationError::not_found("workflow", workflow_name))?;

        let execution = self
            .stores
            .executions
            .create(NewWorkflowExecution {
                pr_id,
                workflow_name: definition.name.clone(),
                metadata: serde_json::json!({
                    "workflow_version": definition.version,
                    "project_id": project_id.to_string(),
                    "variables": variables,
                }),
            })
            .await?;

        // Create tasks with dependencies before dependents so step
        // dependency ids always translate to already-created task ids
        let ordered = topo_steps(&definition);
        let mut task_ids: HashMap<&str, Uuid> = HashMap::new();

        for step in &ordered {
            let dependencies: Vec<Uuid> = step
                .dependencies
                .iter()
                .filter_map(|dep| task_ids.get(dep.as_str()).copied())
                .collect();

            let task = self
                .stores
                .tasks
                .create(NewTask {
                    pr_id,
                    name: step.name.clone(),
                    description: step.description.clone(),
                    task_type: step.step_type,
                    dependencies,
                    priority: TaskPriority::for_step_type(step.step_type),
                    metadata: serde_json::json!({
                        "workflow_execution_id": execution.id.to_string(),
                        "workflow_step_id": step.id,
                        "step_config": step.config,
                    }),
                })
                .await?;
            task_ids.insert(step.id.as_str(), task.id);
        }

        self.mirror_milestones(&execution, &definition, &ordered).await?;

        self.handlers.workflow_started(&execution).await;
        self.bus
            .publish(OrchestrationEvent::WorkflowStarted {
                execution: execution.clone(),
            })
            .await;

        self.dispatch(execution.id).await?;
        Ok(execution)
    }

    /// Register one milestone per step so the DAG, blocker, and progress
    /// engines observe the live workflow
    async fn mirror_milestones(
        &self,
        execution: &WorkflowExecution,
        definition: &WorkflowDefinition,
        ordered: &[&WorkflowStep],
    ) -> Result<()> {
        if definition.steps.is_empty() {
            return Ok(());
        }
        let weight = 100.0 / definition.steps.len() as f64;

        for step in ordered {
            let mut milestone = Milestone::new(
                milestone_id(execution.id, &step.id),
                step.name.clone(),
                execution.id.to_string(),
                weight,
            )
            .with_dependencies(
                step.dependencies
                    .iter()
                    .map(|dep| milestone_id(execution.id, dep))
                    .collect::<Vec<_>>(),
            );
            if let Some(timeout) = step.timeout {
                milestone = milestone.with_expected_completion(timeout);
            }
            self.milestones.register(milestone).await?;
        }
        Ok(())
    }

    /// Dispatch pass: enqueue every runnable task of one execution
    ///
    /// Queue entries reuse the task id, so a pass that races another is
    /// idempotent; re-dispatch after a terminal execution is a no-op.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, execution_id: Uuid) -> Result<usize> {
        let execution = self
            .stores
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow execution", execution_id))?;

        if execution.is_terminal() {
            return Ok(0);
        }

        let runnable = self.stores.tasks.get_runnable().await?;
        let mut enqueued = 0;

        for task in runnable
            .into_iter()
            .filter(|t| t.workflow_execution_id() == Some(execution_id))
        {
            self.queue
                .enqueue(QueuedTask {
                    id: task.id,
                    pr_id: task.pr_id,
                    task_id: task.id,
                    priority_score: task.priority.score(),
                    payload: serde_json::json!({
                        "name": task.name,
                        "step_id": task.workflow_step_id(),
                    }),
                    created_at: Utc::now(),
                    retry_count: 0,
                })
                .await
                .map_err(|e| OrchestrationError::External(e.to_string()))?;
            enqueued += 1;
        }

        debug!(%execution_id, enqueued, "dispatch pass");
        Ok(enqueued)
    }

    /// Execute one task through its registered step executor
    #[instrument(skip(self))]
    pub async fn execute_task(&self, task_id: Uuid) -> Result<TaskRunOutcome> {
        let Some(_guard) = SetGuard::acquire(&self.in_flight, task_id) else {
            debug!(%task_id, "task already in flight");
            return Ok(TaskRunOutcome::Skipped);
        };

        let task = self
            .stores
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("task", task_id))?;

        if task.status != TaskStatus::Pending {
            debug!(%task_id, status = %task.status, "task is not pending; skipping");
            return Ok(TaskRunOutcome::Skipped);
        }

        let execution_id = task.workflow_execution_id().ok_or_else(|| {
            OrchestrationError::Validation(format!("task {task_id} has no workflow execution"))
        })?;
        let execution = self
            .stores
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow execution", execution_id))?;

        if execution.is_terminal() {
            debug!(%task_id, %execution_id, "execution is terminal; skipping");
            return Ok(TaskRunOutcome::Skipped);
        }

        let definition = self
            .definition(&execution.workflow_name)
            .ok_or_else(|| OrchestrationError::not_found("workflow", &execution.workflow_name))?;
        let step_id = task
            .workflow_step_id()
            .ok_or_else(|| {
                OrchestrationError::Validation(format!("task {task_id} has no step id"))
            })?
            .to_string();
        let step = definition
            .step(&step_id)
            .ok_or_else(|| OrchestrationError::not_found("step", &step_id))?
            .clone();

        let task = self
            .stores
            .tasks
            .update_status(task.id, TaskStatus::Running)
            .await?;

        self.set_milestone(execution_id, &step_id, MilestoneStatus::InProgress)
            .await;
        self.handlers.step_started(&execution, &step_id, &task).await;
        self.bus
            .publish(OrchestrationEvent::StepStarted {
                execution_id,
                step_id: step_id.clone(),
                task_id: task.id,
            })
            .await;

        let ctx = StepContext {
            pr_id: task.pr_id,
            project_id: project_id_of(&execution),
            execution: execution.clone(),
            variables: execution.variables(),
        };

        match self.run_step(&step, &ctx, &task).await {
            Ok(outcome) => {
                self.on_step_success(&execution, &definition, &step_id, &task, outcome)
                    .await?;
                Ok(TaskRunOutcome::Completed)
            }
            Err(error) => {
                self.on_step_failure(&execution, &step_id, &task, &error).await?;
                Ok(TaskRunOutcome::Failed(error))
            }
        }
    }

    /// Invoke the executor under the step's timeout
    ///
    /// Returns `Err(message)` for every failure shape: missing executor,
    /// executor error, unsuccessful outcome, or timeout.
    async fn run_step(
        &self,
        step: &WorkflowStep,
        ctx: &StepContext,
        task: &Task,
    ) -> std::result::Result<StepOutcome, String> {
        let Some(executor) = self.executors.get(task.task_type) else {
            return Err(
                OrchestrationError::ExecutorMissing(task.task_type.to_string()).to_string(),
            );
        };

        let timeout = step.timeout.unwrap_or(self.config.task_timeout);
        match tokio::time::timeout(timeout, executor.execute(step, ctx, task)).await {
            Err(_elapsed) => Err(OrchestrationError::StepTimeout {
                step_id: step.id.clone(),
                timeout,
            }
            .to_string()),
            Ok(Err(error)) => Err(error.to_string()),
            Ok(Ok(outcome)) if !outcome.success => {
                Err(outcome.error.unwrap_or_else(|| "step failed".to_string()))
            }
            Ok(Ok(outcome)) => Ok(outcome),
        }
    }

    async fn on_step_success(
        &self,
        execution: &WorkflowExecution,
        definition: &WorkflowDefinition,
        step_id: &str,
        task: &Task,
        outcome: StepOutcome,
    ) -> Result<()> {
        self.stores
            .tasks
            .update_status(task.id, TaskStatus::Completed)
            .await?;

        let next_hint = next_step_hint(definition, execution, step_id);
        let updated = self
            .stores
            .executions
            .add_completed_step(execution.id, step_id, next_hint.as_deref())
            .await?;

        self.set_milestone(execution.id, step_id, MilestoneStatus::Completed)
            .await;
        self.handlers
            .step_completed(&updated, step_id, task, outcome.result.as_ref())
            .await;
        self.bus
            .publish(OrchestrationEvent::StepCompleted {
                execution_id: execution.id,
                step_id: step_id.to_string(),
                task_id: task.id,
                result: outcome.result,
            })
            .await;

        // Completing a step can make dependents runnable
        self.dispatch(execution.id).await?;
        self.check_completion(execution.id).await
    }

    async fn on_step_failure(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        task: &Task,
        error: &str,
    ) -> Result<()> {
        warn!(task_id = %task.id, step_id, error, "step failed");

        self.stores
            .tasks
            .update_status(task.id, TaskStatus::Failed)
            .await?;
        let updated = self
            .stores
            .executions
            .add_failed_step(execution.id, step_id)
            .await?;

        self.handlers.step_failed(&updated, step_id, task, error).await;
        self.bus
            .publish(OrchestrationEvent::StepFailed {
                execution_id: execution.id,
                step_id: step_id.to_string(),
                task_id: task.id,
                error: error.to_string(),
            })
            .await;

        self.check_completion(execution.id).await
    }

    /// Reconcile completion: an execution is terminal once every task is
    /// completed, cancelled, or failed
    pub async fn check_completion(&self, execution_id: Uuid) -> Result<()> {
        let Some(_guard) = SetGuard::acquire(&self.finalizing, execution_id) else {
            return Ok(());
        };

        let execution = self
            .stores
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow execution", execution_id))?;
        if execution.is_terminal() {
            return Ok(());
        }

        let tasks = self.execution_tasks(&execution).await?;
        if !tasks.iter().all(Task::is_terminal) {
            return Ok(());
        }

        let any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);
        if any_failed {
            let updated = self.stores.executions.mark_failed(execution_id).await?;
            info!(%execution_id, "workflow failed");
            self.handlers.workflow_failed(&updated).await;
            self.bus
                .publish(OrchestrationEvent::WorkflowFailed { execution: updated })
                .await;
        } else {
            let updated = self.stores.executions.mark_completed(execution_id).await?;
            info!(%execution_id, "workflow completed");
            self.handlers.workflow_completed(&updated).await;
            self.bus
                .publish(OrchestrationEvent::WorkflowCompleted { execution: updated })
                .await;
        }
        Ok(())
    }

    /// Cancel a task and its entire transitive dependent closure
    ///
    /// Runs inside a transaction with compensating undo so a partial
    /// failure restores the previous task statuses.
    #[instrument(skip(self))]
    pub async fn cancel_task_cascade(&self, task_id: Uuid) -> Result<Vec<Uuid>> {
        let root = self
            .stores
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("task", task_id))?;

        let all = self.stores.tasks.get_by_pr(root.pr_id).await?;

        // Transitive dependent closure, root included
        let mut closure: HashSet<Uuid> = HashSet::from([task_id]);
        loop {
            let before = closure.len();
            for task in &all {
                if !closure.contains(&task.id)
                    && task.dependencies.iter().any(|d| closure.contains(d))
                {
                    closure.insert(task.id);
                }
            }
            if closure.len() == before {
                break;
            }
        }

        let targets: Vec<&Task> = all
            .iter()
            .filter(|t| closure.contains(&t.id) && !t.is_terminal())
            .collect();

        let tx_id = self
            .txns
            .begin(vec!["tasks".to_string()], self.config.transaction_timeout);

        for target in &targets {
            let id = target.id;
            let previous = target.status;
            let tasks = Arc::clone(&self.stores.tasks);
            let undo_tasks = Arc::clone(&self.stores.tasks);
            let queue = Arc::clone(&self.queue);

            self.txns
                .add_operation(
                    tx_id,
                    Operation::new(
                        "cancel_task",
                        id.to_string(),
                        serde_json::json!({ "previous_status": previous.as_str() }),
                        move || {
                            let tasks = Arc::clone(&tasks);
                            let queue = Arc::clone(&queue);
                            async move {
                                tasks
                                    .update_status(id, TaskStatus::Cancelled)
                                    .await
                                    .map_err(anyhow::Error::msg)?;
                                queue.discard(id).await.map_err(anyhow::Error::msg)?;
                                Ok(serde_json::json!(id.to_string()))
                            }
                        },
                        move || {
                            let tasks = Arc::clone(&undo_tasks);
                            async move {
                                tasks
                                    .update_status(id, previous)
                                    .await
                                    .map_err(anyhow::Error::msg)?;
                                Ok(serde_json::Value::Null)
                            }
                        },
                    ),
                )
                .await
                .map_err(OrchestrationError::from)?;
        }

        self.txns.commit(tx_id).await.map_err(OrchestrationError::from)?;

        let cancelled: Vec<Uuid> = targets.iter().map(|t| t.id).collect();
        info!(%task_id, cancelled = cancelled.len(), "cancelled task cascade");

        // Mirror the cancellations onto the milestone graph and let the
        // execution reconcile (all-cancelled workflows complete)
        if let Some(execution_id) = root.workflow_execution_id() {
            for target in &targets {
                if let Some(step_id) = target.workflow_step_id() {
                    self.set_milestone(execution_id, step_id, MilestoneStatus::Skipped)
                        .await;
                }
            }
            self.check_completion(execution_id).await?;
        }
        Ok(cancelled)
    }

    /// Tasks belonging to one execution
    async fn execution_tasks(&self, execution: &WorkflowExecution) -> Result<Vec<Task>> {
        Ok(self
            .stores
            .tasks
            .get_by_pr(execution.pr_id)
            .await?
            .into_iter()
            .filter(|t| t.workflow_execution_id() == Some(execution.id))
            .collect())
    }

    /// Best-effort milestone mirror update; a missing milestone is fine
    async fn set_milestone(&self, execution_id: Uuid, step_id: &str, status: MilestoneStatus) {
        let id = milestone_id(execution_id, step_id);
        match self.milestones.get(&id).await {
            Ok(Some(_)) => {
                if let Err(error) = self.milestones.transition(&id, status).await {
                    warn!(milestone_id = %id, %error, "milestone mirror update failed");
                }
            }
            Ok(None) => {}
            Err(error) => warn!(milestone_id = %id, %error, "milestone lookup failed"),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn milestones(&self) -> &Arc<MilestoneService> {
        &self.milestones
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("definitions", &self.definitions.read().len())
            .field("executors", &self.executors.len())
            .finish_non_exhaustive()
    }
}

/// Milestone id mirroring one step of one execution
fn milestone_id(execution_id: Uuid, step_id: &str) -> String {
    format!("{execution_id}/{step_id}")
}

fn project_id_of(execution: &WorkflowExecution) -> Uuid {
    execution
        .metadata
        .get("project_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::nil)
}

/// Definition steps ordered so dependencies come before dependents,
/// stable with respect to definition order
fn topo_steps(definition: &WorkflowDefinition) -> Vec<&WorkflowStep> {
    let by_id: HashMap<&str, &WorkflowStep> = definition
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<&WorkflowStep> = Vec::with_capacity(definition.steps.len());

    fn visit<'a>(
        step: &'a WorkflowStep,
        by_id: &HashMap<&'a str, &'a WorkflowStep>,
        visited: &mut HashSet<&'a str>,
        ordered: &mut Vec<&'a WorkflowStep>,
    ) {
        if !visited.insert(step.id.as_str()) {
            return;
        }
        for dep in &step.dependencies {
            if let Some(dep_step) = by_id.get(dep.as_str()) {
                visit(dep_step, by_id, visited, ordered);
            }
        }
        ordered.push(step);
    }

    for step in &definition.steps {
        visit(step, &by_id, &mut visited, &mut ordered);
    }
    ordered
}

/// The first not-yet-finished step in definition order, as a hint
fn next_step_hint(
    definition: &WorkflowDefinition,
    execution: &WorkflowExecution,
    just_completed: &str,
) -> Option<String> {
    definition
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .find(|id| {
            *id != just_completed
                && !execution.steps_completed.iter().any(|c| c == id)
                && !execution.steps_failed.iter().any(|f| f == id)
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mergeflow_core::model::StepType;
    use mergeflow_core::WorkflowExecutionStatus;
    use mergeflow_queue::InMemoryTaskQueue;
    use std::time::Duration;

    struct OkExecutor;

    #[async_trait]
    impl StepExecutor for OkExecutor {
        async fn execute(
            &self,
            step: &WorkflowStep,
            _ctx: &StepContext,
            _task: &Task,
        ) -> anyhow::Result<StepOutcome> {
            Ok(StepOutcome::ok(serde_json::json!({ "step": step.id })))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl StepExecutor for FailingExecutor {
        async fn execute(
            &self,
            _step: &WorkflowStep,
            _ctx: &StepContext,
            _task: &Task,
        ) -> anyhow::Result<StepOutcome> {
            Ok(StepOutcome::failed("codegen rejected the diff"))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl StepExecutor for SlowExecutor {
        async fn execute(
            &self,
            _step: &WorkflowStep,
            _ctx: &StepContext,
            _task: &Task,
        ) -> anyhow::Result<StepOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(StepOutcome::ok_empty())
        }
    }

    fn engine() -> WorkflowEngine {
        let stores = Stores::in_memory();
        let bus = Arc::new(EventBus::new());
        let milestones = Arc::new(MilestoneService::new(
            Arc::clone(&stores.milestones),
            Arc::clone(&bus),
        ));
        WorkflowEngine::new(
            stores,
            Arc::new(InMemoryTaskQueue::new()),
            bus,
            milestones,
            Arc::new(TransactionManager::new()),
            OrchestratorConfig::default(),
        )
    }

    fn chain_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("chain", "1.0.0").with_steps(vec![
            WorkflowStep::new("a", "A", StepType::Analysis),
            WorkflowStep::new("b", "B", StepType::Analysis).with_dependencies(vec!["a"]),
            WorkflowStep::new("c", "C", StepType::Notification).with_dependencies(vec!["b"]),
        ])
    }

    /// Drain the queue, executing every leased task until it is empty
    async fn drain(engine: &WorkflowEngine) {
        while let Some(leased) = engine.queue().dequeue().await.unwrap() {
            engine.execute_task(leased.task_id).await.unwrap();
            engine.queue().complete(leased.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_start_materializes_tasks_and_milestones() {
        let engine = engine();
        engine.register_workflow(chain_definition()).unwrap();

        let pr_id = Uuid::now_v7();
        let execution = engine
            .start(pr_id, Uuid::now_v7(), "chain", serde_json::json!({}))
            .await
            .unwrap();

        let tasks = engine.stores().tasks.get_by_pr(pr_id).await.unwrap();
        assert_eq!(tasks.len(), 3);

        // Dependencies were translated to task ids
        let by_step: HashMap<&str, &Task> = tasks
            .iter()
            .map(|t| (t.workflow_step_id().unwrap(), t))
            .collect();
        assert!(by_step["a"].dependencies.is_empty());
        assert_eq!(by_step["b"].dependencies, vec![by_step["a"].id]);

        // Step-type priority derivation
        assert_eq!(by_step["a"].priority, TaskPriority::High);
        assert_eq!(by_step["c"].priority, TaskPriority::Low);

        // Milestones mirror the steps
        let snapshot = engine
            .milestones()
            .snapshot(&execution.id.to_string())
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 3);

        // Only the root task is runnable, so one task is queued
        assert_eq!(engine.queue().stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_chain_runs_to_completion_in_order() {
        // step_started order a, b, c; steps_completed [a, b, c];
        // terminal status completed
        let engine = engine();
        engine.register_workflow(chain_definition()).unwrap();
        engine.register_executor(StepType::Analysis, Arc::new(OkExecutor));
        engine.register_executor(StepType::Notification, Arc::new(OkExecutor));

        let started: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(vec![]));
        {
            let started = Arc::clone(&started);
            engine.bus.subscribe(
                mergeflow_core::events::topics::STEP_STARTED,
                move |event| {
                    let started = Arc::clone(&started);
                    async move {
                        if let OrchestrationEvent::StepStarted { step_id, .. } = event {
                            started.lock().push(step_id);
                        }
                        Ok(())
                    }
                },
            );
        }

        let execution = engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "chain", serde_json::json!({}))
            .await
            .unwrap();

        drain(&engine).await;

        assert_eq!(*started.lock(), vec!["a", "b", "c"]);

        let finished = engine
            .stores()
            .executions
            .get_by_id(execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, WorkflowExecutionStatus::Completed);
        assert_eq!(finished.steps_completed, vec!["a", "b", "c"]);
        assert!(finished.steps_failed.is_empty());
    }

    #[tokio::test]
    async fn test_step_failure_fails_workflow() {
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("single", "1.0.0").with_steps(vec![
                WorkflowStep::new("gen", "Generate", StepType::Codegen),
            ]))
            .unwrap();
        engine.register_executor(StepType::Codegen, Arc::new(FailingExecutor));

        let execution = engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "single", serde_json::json!({}))
            .await
            .unwrap();

        let leased = engine.queue().dequeue().await.unwrap().unwrap();
        let outcome = engine.execute_task(leased.task_id).await.unwrap();
        assert!(matches!(outcome, TaskRunOutcome::Failed(ref e) if e.contains("codegen rejected")));

        let finished = engine
            .stores()
            .executions
            .get_by_id(execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, WorkflowExecutionStatus::Failed);
        assert_eq!(finished.steps_failed, vec!["gen"]);
    }

    #[tokio::test]
    async fn test_missing_executor_is_step_failure() {
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("single", "1.0.0").with_steps(vec![
                WorkflowStep::new("gen", "Generate", StepType::Codegen),
            ]))
            .unwrap();
        // No executor registered for codegen

        engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "single", serde_json::json!({}))
            .await
            .unwrap();

        let leased = engine.queue().dequeue().await.unwrap().unwrap();
        let outcome = engine.execute_task(leased.task_id).await.unwrap();
        assert!(
            matches!(outcome, TaskRunOutcome::Failed(ref e) if e.contains("no executor registered"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_distinct_failure() {
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("single", "1.0.0").with_steps(vec![
                WorkflowStep::new("slow", "Slow", StepType::Custom)
                    .with_timeout(Duration::from_millis(100)),
            ]))
            .unwrap();
        engine.register_executor(StepType::Custom, Arc::new(SlowExecutor));

        engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "single", serde_json::json!({}))
            .await
            .unwrap();

        let leased = engine.queue().dequeue().await.unwrap().unwrap();
        let outcome = engine.execute_task(leased.task_id).await.unwrap();
        assert!(matches!(outcome, TaskRunOutcome::Failed(ref e) if e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_execute_completed_task_is_noop() {
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("single", "1.0.0").with_steps(vec![
                WorkflowStep::new("a", "A", StepType::Analysis),
            ]))
            .unwrap();
        engine.register_executor(StepType::Analysis, Arc::new(OkExecutor));

        engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "single", serde_json::json!({}))
            .await
            .unwrap();

        let leased = engine.queue().dequeue().await.unwrap().unwrap();
        assert_eq!(
            engine.execute_task(leased.task_id).await.unwrap(),
            TaskRunOutcome::Completed
        );

        // Re-delivery after completion (e.g. an expired lease) is a no-op
        assert_eq!(
            engine.execute_task(leased.task_id).await.unwrap(),
            TaskRunOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_duplicate_workflow_registration_conflicts() {
        let engine = engine();
        engine.register_workflow(chain_definition()).unwrap();
        let duplicate = engine.register_workflow(chain_definition());
        assert!(matches!(duplicate, Err(OrchestrationError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cancel_cascades_to_dependents() {
        let engine = engine();
        engine.register_workflow(chain_definition()).unwrap();

        let pr_id = Uuid::now_v7();
        let execution = engine
            .start(pr_id, Uuid::now_v7(), "chain", serde_json::json!({}))
            .await
            .unwrap();

        let tasks = engine.stores().tasks.get_by_pr(pr_id).await.unwrap();
        let root = tasks
            .iter()
            .find(|t| t.workflow_step_id() == Some("a"))
            .unwrap();

        let cancelled = engine.cancel_task_cascade(root.id).await.unwrap();
        assert_eq!(cancelled.len(), 3);

        for task in engine.stores().tasks.get_by_pr(pr_id).await.unwrap() {
            assert_eq!(task.status, TaskStatus::Cancelled);
        }

        // All tasks cancelled, none failed: the execution completes
        let finished = engine
            .stores()
            .executions
            .get_by_id(execution.id)
            .await
            .unwrap()
            .unwrap();
        assert!(finished.is_terminal());
        assert_eq!(finished.status, WorkflowExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_dispatch_after_terminal_is_noop() {
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("single", "1.0.0").with_steps(vec![
                WorkflowStep::new("a", "A", StepType::Analysis),
            ]))
            .unwrap();
        engine.register_executor(StepType::Analysis, Arc::new(OkExecutor));

        let execution = engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "single", serde_json::json!({}))
            .await
            .unwrap();
        drain(&engine).await;

        assert_eq!(engine.dispatch(execution.id).await.unwrap(), 0);
        assert_eq!(engine.queue().stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_diamond_parallelism() {
        // After the root completes, both branches are runnable at once
        let engine = engine();
        engine
            .register_workflow(WorkflowDefinition::new("diamond", "1.0.0").with_steps(vec![
                WorkflowStep::new("root", "Root", StepType::Analysis),
                WorkflowStep::new("left", "Left", StepType::Codegen)
                    .with_dependencies(vec!["root"]),
                WorkflowStep::new("right", "Right", StepType::Codegen)
                    .with_dependencies(vec!["root"]),
                WorkflowStep::new("join", "Join", StepType::Validation)
                    .with_dependencies(vec!["left", "right"]),
            ]))
            .unwrap();
        engine.register_executor(StepType::Analysis, Arc::new(OkExecutor));
        engine.register_executor(StepType::Codegen, Arc::new(OkExecutor));
        engine.register_executor(StepType::Validation, Arc::new(OkExecutor));

        let execution = engine
            .start(Uuid::now_v7(), Uuid::now_v7(), "diamond", serde_json::json!({}))
            .await
            .unwrap();

        let leased = engine.queue().dequeue().await.unwrap().unwrap();
        engine.execute_task(leased.task_id).await.unwrap();
        engine.queue().complete(leased.id).await.unwrap();

        // Both branches queued after the root completed
        assert_eq!(engine.queue().stats().await.unwrap().pending, 2);

        drain(&engine).await;
        let finished = engine
            .stores()
            .executions
            .get_by_id(execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, WorkflowExecutionStatus::Completed);
    }
}
