//! Orchestrator lifecycle, schedulers, and the PR-event entry point

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use mergeflow_core::events::topics;
use mergeflow_core::model::{
    AnalysisStatus, CodegenTaskSummary, DatabaseSummary, ModuleOutput, PrEventData, StepType,
};
use mergeflow_core::{
    EventBus, OrchestrationError, OrchestrationEvent, OrchestratorConfig,
};
use mergeflow_engine::{
    BlockerDetector, MilestoneService, ProgressAggregator, ProgressSnapshot, TransactionManager,
    WorkflowEngine,
};
use mergeflow_queue::{InMemoryTaskQueue, QueueError, TaskQueue};
use mergeflow_storage::{NewProject, StoreError, Stores};

use crate::default_workflow::{pr_analysis_workflow, PR_ANALYSIS_WORKFLOW};
use crate::executors::{
    AnalysisExecutor, CodegenExecutor, NotificationExecutor, ValidationExecutor,
};

/// Orchestrator lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorStatus {
    /// Not yet initialized, or shut down
    Stopped,
    /// Schedulers running, accepting PR events
    Running,
    /// Shutdown in progress; draining workers
    Draining,
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Engine-level failure
    #[error(transparent)]
    Engine(#[from] OrchestrationError),

    /// Initialize called while running
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// Entry point called before initialize
    #[error("orchestrator is not running")]
    NotRunning,
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        Self::Engine(err.into())
    }
}

impl From<QueueError> for OrchestratorError {
    fn from(err: QueueError) -> Self {
        Self::Engine(OrchestrationError::External(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct FindingCounts {
    total: u32,
    critical: u32,
}

/// The orchestrator
///
/// Wires stores, queue, bus, and engine; owns the background schedulers
/// (task processors, cleanup, health check, queue recovery, blocker
/// detection + metrics); and exposes [`Orchestrator::process_pr_event`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    stores: Stores,
    queue: Arc<dyn TaskQueue>,
    bus: Arc<EventBus>,
    engine: Arc<WorkflowEngine>,
    milestones: Arc<MilestoneService>,
    detector: Arc<BlockerDetector>,
    aggregator: Arc<ProgressAggregator>,
    txns: Arc<TransactionManager>,

    status: RwLock<OrchestratorStatus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Active execution ids, fed by workflow lifecycle events
    live_executions: Arc<RwLock<HashSet<Uuid>>>,

    /// Analysis finding counts per PR, fed by step results
    findings: Arc<RwLock<HashMap<Uuid, FindingCounts>>>,

    /// Codegen prompts per task, fed by step results
    prompts: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl Orchestrator {
    /// Orchestrator over in-memory backends (tests, single process)
    pub fn in_memory(config: OrchestratorConfig) -> Self {
        Self::with_backends(
            Stores::in_memory(),
            Arc::new(InMemoryTaskQueue::new()),
            config,
        )
    }

    /// Orchestrator over caller-provided backends
    pub fn with_backends(
        stores: Stores,
        queue: Arc<dyn TaskQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let milestones = Arc::new(MilestoneService::new(
            Arc::clone(&stores.milestones),
            Arc::clone(&bus),
        ));
        let txns = Arc::new(TransactionManager::new());
        let detector = Arc::new(BlockerDetector::new(
            Arc::clone(&milestones),
            Arc::clone(&stores.blockers),
            Arc::clone(&bus),
        ));
        let engine = Arc::new(WorkflowEngine::new(
            stores.clone(),
            Arc::clone(&queue),
            Arc::clone(&bus),
            Arc::clone(&milestones),
            Arc::clone(&txns),
            config.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            stores,
            queue,
            bus,
            engine,
            milestones,
            detector,
            aggregator: Arc::new(ProgressAggregator::new()),
            txns,
            status: RwLock::new(OrchestratorStatus::Stopped),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
            live_executions: Arc::new(RwLock::new(HashSet::new())),
            findings: Arc::new(RwLock::new(HashMap::new())),
            prompts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register defaults, wire observers, and start the schedulers
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), OrchestratorError> {
        {
            let mut status = self.status.write();
            if *status == OrchestratorStatus::Running {
                return Err(OrchestratorError::AlreadyRunning);
            }
            *status = OrchestratorStatus::Running;
        }

        self.engine.register_workflow(pr_analysis_workflow())?;
        self.engine
            .register_executor(StepType::Analysis, Arc::new(AnalysisExecutor));
        self.engine
            .register_executor(StepType::Codegen, Arc::new(CodegenExecutor));
        self.engine
            .register_executor(StepType::Validation, Arc::new(ValidationExecutor));
        self.engine
            .register_executor(StepType::Notification, Arc::new(NotificationExecutor));

        if self.config.enable_blocker_detection {
            self.detector.attach(&self.bus);
        }
        self.subscribe_lifecycle();
        self.subscribe_step_results();

        self.start_task_processors();
        self.start_scheduler("cleanup", self.config.cleanup_interval, {
            let txns = Arc::clone(&self.txns);
            move || {
                let txns = Arc::clone(&txns);
                async move {
                    let removed = txns.cleanup_completed().await;
                    debug!(removed, "cleanup pass finished");
                    Ok(())
                }
            }
        });
        self.start_scheduler("health_check", self.config.health_check_interval, {
            let queue = Arc::clone(&self.queue);
            let live = Arc::clone(&self.live_executions);
            move || {
                let queue = Arc::clone(&queue);
                let live = Arc::clone(&live);
                async move {
                    let stats = queue.stats().await?;
                    let live_count = live.read().len();
                    if stats.dead_letter > 0 {
                        warn!(
                            pending = stats.pending,
                            processing = stats.processing,
                            dead_letter = stats.dead_letter,
                            live_workflows = live_count,
                            "health check: degraded (dead letters present)"
                        );
                    } else {
                        debug!(
                            pending = stats.pending,
                            processing = stats.processing,
                            live_workflows = live_count,
                            "health check: ok"
                        );
                    }
                    Ok(())
                }
            }
        });
        self.start_scheduler("queue_recovery", self.config.queue_recovery_interval, {
            let queue = Arc::clone(&self.queue);
            let stores = self.stores.clone();
            move || {
                let queue = Arc::clone(&queue);
                let stores = stores.clone();
                async move {
                    recover_queue(&queue, &stores).await?;
                    Ok(())
                }
            }
        });
        self.start_scheduler(
            "blocker_detection",
            self.config.metric_calculation_interval,
            {
                let detector = Arc::clone(&self.detector);
                let aggregator = Arc::clone(&self.aggregator);
                let milestones = Arc::clone(&self.milestones);
                let stores = self.stores.clone();
                let bus = Arc::clone(&self.bus);
                let live = Arc::clone(&self.live_executions);
                let detect = self.config.enable_blocker_detection;
                let analytics = self.config.enable_predictive_analytics;
                move || {
                    let detector = Arc::clone(&detector);
                    let aggregator = Arc::clone(&aggregator);
                    let milestones = Arc::clone(&milestones);
                    let stores = stores.clone();
                    let bus = Arc::clone(&bus);
                    let live = Arc::clone(&live);
                    async move {
                        let executions: Vec<Uuid> = live.read().iter().copied().collect();
                        for execution_id in executions {
                            let workflow_id = execution_id.to_string();
                            if detect {
                                detector.run_detection(&workflow_id).await?;
                            }
                            if analytics {
                                let entries = milestones.snapshot(&workflow_id).await?;
                                let blockers =
                                    stores.blockers.list_active(&workflow_id).await?;
                                let snapshot =
                                    ProgressSnapshot::new(&workflow_id, entries, blockers);
                                aggregator.publish_all(&snapshot, &bus).await;
                            }
                        }
                        Ok(())
                    }
                }
            },
        );

        info!(
            workers = self.config.max_concurrent_tasks,
            "orchestrator initialized"
        );
        Ok(())
    }

    /// Stop schedulers and drain the worker loops (best-effort, bounded)
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        {
            let mut status = self.status.write();
            if *status == OrchestratorStatus::Stopped {
                return Ok(());
            }
            *status = OrchestratorStatus::Draining;
        }

        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                warn!("scheduler did not drain in time; aborting");
                handle.abort();
            }
        }

        *self.status.write() = OrchestratorStatus::Stopped;
        info!("orchestrator stopped");
        Ok(())
    }

    pub fn status(&self) -> OrchestratorStatus {
        *self.status.read()
    }

    /// PR-event entry point
    ///
    /// Ensures the project and PR rows exist, starts the `pr_analysis`
    /// workflow bound to the PR, and returns the current analysis
    /// summary.
    #[instrument(skip(self, data))]
    pub async fn process_pr_event(
        &self,
        repo_id: &str,
        pr_number: i64,
        data: &PrEventData,
    ) -> Result<ModuleOutput, OrchestratorError> {
        if self.status() != OrchestratorStatus::Running {
            return Err(OrchestratorError::NotRunning);
        }

        let project = match self.stores.projects.get_by_repository_id(repo_id).await? {
            Some(project) => project,
            None => {
                self.stores
                    .projects
                    .create(NewProject {
                        repository_id: repo_id.to_string(),
                        name: repo_id.to_string(),
                    })
                    .await?
            }
        };

        let pr = self
            .stores
            .prs
            .get_or_create(project.id, pr_number, data)
            .await?;

        let variables = serde_json::json!({
            "pr_number": pr_number,
            "title": data.title,
            "description": data.description,
            "author": data.author,
            "status": data.status,
            "base_branch": data.base_branch,
            "head_branch": data.head_branch,
        });

        self.engine
            .start(pr.id, project.id, PR_ANALYSIS_WORKFLOW, variables.clone())
            .await?;

        // Registered workflows can opt into PR events via triggers; the
        // default workflow already ran above
        for name in self.engine.matching_definitions("pr_updated", &variables) {
            if name == PR_ANALYSIS_WORKFLOW {
                continue;
            }
            self.engine
                .start(pr.id, project.id, &name, variables.clone())
                .await?;
        }

        self.module_output(pr.id).await
    }

    /// Assemble the external observer summary for one PR
    pub async fn module_output(&self, pr_id: Uuid) -> Result<ModuleOutput, OrchestratorError> {
        let execution = self
            .stores
            .executions
            .get_latest_by_pr(pr_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("workflow execution for pr", pr_id))?;

        let pr = self
            .stores
            .prs
            .get_by_id(pr_id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("pr", pr_id))?;

        let tasks = self.stores.tasks.get_by_pr(pr_id).await?;
        let prompts = self.prompts.read();
        let codegen_tasks: Vec<CodegenTaskSummary> = tasks
            .iter()
            .filter(|t| t.task_type == StepType::Codegen)
            .map(|t| CodegenTaskSummary {
                task_id: t.id,
                status: t.status,
                prompt: prompts.get(&t.id).cloned().unwrap_or_else(|| t.name.clone()),
                priority: t.priority,
            })
            .collect();

        let counts = self.findings.read().get(&pr_id).copied().unwrap_or_default();

        Ok(ModuleOutput::new(
            execution.status,
            DatabaseSummary {
                pr_id,
                analysis_complete: pr.analysis_status == AnalysisStatus::Complete,
                total_findings: counts.total,
                critical_issues: counts.critical,
                codegen_tasks,
            },
        ))
    }

    /// One stale-lease recovery pass; exposed for the scheduler and tests
    pub async fn run_queue_recovery(&self) -> Result<usize, OrchestratorError> {
        recover_queue(&self.queue, &self.stores).await
    }

    fn subscribe_lifecycle(&self) {
        let live = Arc::clone(&self.live_executions);
        let stores = self.stores.clone();
        self.bus.subscribe(topics::WORKFLOW_STARTED, move |event| {
            let live = Arc::clone(&live);
            let stores = stores.clone();
            async move {
                if let OrchestrationEvent::WorkflowStarted { execution } = event {
                    live.write().insert(execution.id);
                    if let Some(pr) = stores.prs.get_by_id(execution.pr_id).await? {
                        stores
                            .prs
                            .update_status(pr.id, pr.status, Some(AnalysisStatus::Running))
                            .await?;
                    }
                }
                Ok(())
            }
        });

        for (topic, analysis) in [
            (topics::WORKFLOW_COMPLETED, AnalysisStatus::Complete),
            (topics::WORKFLOW_FAILED, AnalysisStatus::Failed),
        ] {
            let live = Arc::clone(&self.live_executions);
            let stores = self.stores.clone();
            self.bus.subscribe(topic, move |event| {
                let live = Arc::clone(&live);
                let stores = stores.clone();
                async move {
                    let execution = match event {
                        OrchestrationEvent::WorkflowCompleted { execution }
                        | OrchestrationEvent::WorkflowFailed { execution } => execution,
                        _ => return Ok(()),
                    };
                    live.write().remove(&execution.id);
                    if let Some(pr) = stores.prs.get_by_id(execution.pr_id).await? {
                        stores
                            .prs
                            .update_status(pr.id, pr.status, Some(analysis))
                            .await?;
                    }
                    Ok(())
                }
            });
        }
    }

    fn subscribe_step_results(&self) {
        let findings = Arc::clone(&self.findings);
        let prompts = Arc::clone(&self.prompts);
        let stores = self.stores.clone();
        self.bus.subscribe(topics::STEP_COMPLETED, move |event| {
            let findings = Arc::clone(&findings);
            let prompts = Arc::clone(&prompts);
            let stores = stores.clone();
            async move {
                let OrchestrationEvent::StepCompleted {
                    task_id,
                    result: Some(result),
                    ..
                } = event
                else {
                    return Ok(());
                };

                if let Some(prompt) = result["prompt"].as_str() {
                    prompts.write().insert(task_id, prompt.to_string());
                }

                if let (Some(total), Some(critical)) = (
                    result["total_findings"].as_u64(),
                    result["critical_issues"].as_u64(),
                ) {
                    if let Some(task) = stores.tasks.get_by_id(task_id).await? {
                        findings.write().insert(
                            task.pr_id,
                            FindingCounts {
                                total: total as u32,
                                critical: critical as u32,
                            },
                        );
                    }
                }
                Ok(())
            }
        });
    }

    /// Spawn the `max_concurrent_tasks` worker loops
    ///
    /// Each loop: dequeue → execute → complete or fail → sleep → repeat.
    /// Step-level failures are recorded canonically on the task row, so
    /// the lease completes; only engine-level errors (store or queue
    /// unavailable) fail the lease and consume retry budget.
    fn start_task_processors(&self) {
        for worker in 0..self.config.max_concurrent_tasks {
            let engine = Arc::clone(&self.engine);
            let queue = Arc::clone(&self.queue);
            let bus = Arc::clone(&self.bus);
            let mut shutdown_rx = self.shutdown_rx.clone();
            let idle = self.config.worker_idle_sleep;
            let retries = self.config.retry_attempts;

            let handle = tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }

                    match queue.dequeue().await {
                        Ok(Some(leased)) => match engine.execute_task(leased.task_id).await {
                            Ok(_outcome) => {
                                if let Err(error) = queue.complete(leased.id).await {
                                    error!(worker, %error, "failed to complete lease");
                                }
                            }
                            Err(engine_error) => {
                                warn!(worker, %engine_error, task_id = %leased.task_id, "task execution errored");
                                bus.publish(OrchestrationEvent::SystemError {
                                    source: "task_processor".to_string(),
                                    message: engine_error.to_string(),
                                })
                                .await;
                                if let Err(error) = queue
                                    .fail(leased.id, &engine_error.to_string(), retries)
                                    .await
                                {
                                    error!(worker, %error, "failed to fail lease");
                                }
                            }
                        },
                        Ok(None) => {}
                        Err(error) => {
                            error!(worker, %error, "dequeue failed");
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(idle) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                debug!(worker, "task processor exited");
            });
            self.handles.lock().push(handle);
        }
    }

    /// Spawn a fixed-interval scheduler; a failing pass logs, emits
    /// `system_error`, and never interrupts other schedulers
    fn start_scheduler<F, Fut>(&self, name: &'static str, interval: Duration, pass: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
    {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let bus = Arc::clone(&self.bus);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so passes start
            // one interval after boot
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = pass().await {
                            error!(scheduler = name, %error, "scheduler pass failed");
                            bus.publish(OrchestrationEvent::SystemError {
                                source: name.to_string(),
                                message: error.to_string(),
                            })
                            .await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(scheduler = name, "shutdown requested");
                        break;
                    }
                }
            }
        });
        self.handles.lock().push(handle);
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn milestones(&self) -> &Arc<MilestoneService> {
        &self.milestones
    }

    pub fn detector(&self) -> &Arc<BlockerDetector> {
        &self.detector
    }

    pub fn aggregator(&self) -> &Arc<ProgressAggregator> {
        &self.aggregator
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("status", &self.status())
            .field("workers", &self.config.max_concurrent_tasks)
            .finish_non_exhaustive()
    }
}

/// Re-enqueue expired leases, discarding entries whose canonical task
/// row has been deleted; returns how many entries were kept
async fn recover_queue(
    queue: &Arc<dyn TaskQueue>,
    stores: &Stores,
) -> Result<usize, OrchestratorError> {
    let recovered = queue.recover_stale().await?;
    let mut kept = 0;

    for id in recovered {
        // Queue entries reuse the task id
        if stores.tasks.get_by_id(id).await?.is_some() {
            kept += 1;
        } else {
            debug!(%id, "discarding recovered lease without a task row");
            queue.discard(id).await?;
        }
    }
    Ok(kept)
}
