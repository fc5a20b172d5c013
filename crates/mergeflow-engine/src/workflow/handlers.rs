//! Ordered workflow/step observer hooks

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;

use mergeflow_core::model::{Task, WorkflowExecution};

/// Observer with optional hooks for workflow and step lifecycle
///
/// Handlers are invoked synchronously in registration order; a handler
/// error is logged and does not affect engine state or later handlers.
#[async_trait]
pub trait WorkflowEventHandler: Send + Sync + 'static {
    async fn on_workflow_started(&self, _execution: &WorkflowExecution) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_workflow_completed(&self, _execution: &WorkflowExecution) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_workflow_failed(&self, _execution: &WorkflowExecution) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_started(
        &self,
        _execution: &WorkflowExecution,
        _step_id: &str,
        _task: &Task,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_completed(
        &self,
        _execution: &WorkflowExecution,
        _step_id: &str,
        _task: &Task,
        _result: Option<&serde_json::Value>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_step_failed(
        &self,
        _execution: &WorkflowExecution,
        _step_id: &str,
        _task: &Task,
        _error: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered list of registered handlers; append-only after init
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn WorkflowEventHandler>>>,
}

macro_rules! dispatch {
    ($self:ident, $hook:ident ( $($arg:expr),* )) => {{
        let handlers: Vec<Arc<dyn WorkflowEventHandler>> = $self.handlers.read().clone();
        for handler in handlers {
            if let Err(error) = handler.$hook($($arg),*).await {
                warn!(hook = stringify!($hook), %error, "workflow event handler failed");
            }
        }
    }};
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn WorkflowEventHandler>) {
        self.handlers.write().push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    pub async fn workflow_started(&self, execution: &WorkflowExecution) {
        dispatch!(self, on_workflow_started(execution));
    }

    pub async fn workflow_completed(&self, execution: &WorkflowExecution) {
        dispatch!(self, on_workflow_completed(execution));
    }

    pub async fn workflow_failed(&self, execution: &WorkflowExecution) {
        dispatch!(self, on_workflow_failed(execution));
    }

    pub async fn step_started(&self, execution: &WorkflowExecution, step_id: &str, task: &Task) {
        dispatch!(self, on_step_started(execution, step_id, task));
    }

    pub async fn step_completed(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        task: &Task,
        result: Option<&serde_json::Value>,
    ) {
        dispatch!(self, on_step_completed(execution, step_id, task, result));
    }

    pub async fn step_failed(
        &self,
        execution: &WorkflowExecution,
        step_id: &str,
        task: &Task,
        error: &str,
    ) {
        dispatch!(self, on_step_failed(execution, step_id, task, error));
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mergeflow_core::model::WorkflowExecutionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn execution() -> WorkflowExecution {
        WorkflowExecution {
            id: Uuid::now_v7(),
            pr_id: Uuid::now_v7(),
            workflow_name: "test".to_string(),
            status: WorkflowExecutionStatus::Active,
            current_step: None,
            steps_completed: vec![],
            steps_failed: vec![],
            metadata: serde_json::Value::Null,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    struct Counting {
        started: AtomicUsize,
    }

    #[async_trait]
    impl WorkflowEventHandler for Counting {
        async fn on_workflow_started(&self, _execution: &WorkflowExecution) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl WorkflowEventHandler for Failing {
        async fn on_workflow_started(&self, _execution: &WorkflowExecution) -> anyhow::Result<()> {
            anyhow::bail!("observer exploded")
        }
    }

    #[tokio::test]
    async fn test_handlers_run_and_failures_are_swallowed() {
        let registry = HandlerRegistry::new();
        let counting = Arc::new(Counting {
            started: AtomicUsize::new(0),
        });

        registry.register(Arc::new(Failing));
        registry.register(Arc::clone(&counting) as Arc<dyn WorkflowEventHandler>);

        registry.workflow_started(&execution()).await;
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        struct Silent;
        #[async_trait]
        impl WorkflowEventHandler for Silent {}

        let registry = HandlerRegistry::new();
        registry.register(Arc::new(Silent));
        registry.workflow_completed(&execution()).await;
        registry.workflow_failed(&execution()).await;
    }
}
