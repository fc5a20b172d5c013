//! Step executor trait and registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mergeflow_core::model::{StepType, Task, WorkflowExecution, WorkflowStep};

/// Execution context handed to a step executor
#[derive(Debug, Clone)]
pub struct StepContext {
    pub pr_id: Uuid,
    pub project_id: Uuid,
    pub execution: WorkflowExecution,

    /// Caller-supplied variables recorded when the workflow started
    pub variables: serde_json::Value,
}

/// Result of one executor invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl StepOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            metadata: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            result: None,
            error: None,
            metadata: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A unit of step execution, registered per step type
///
/// The engine does not know what executors do; it promises at most one
/// concurrent call per task id and treats `Err` and
/// `success = false` alike as step failure. Executors must be
/// idempotent at the result level: a lease that expires mid-execution
/// can lead to re-dispatch.
#[async_trait]
pub trait StepExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &StepContext,
        task: &Task,
    ) -> anyhow::Result<StepOutcome>;
}

/// Map of step type → executor; append-only after initialization
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<StepType, Arc<dyn StepExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Register an executor for a step type, replacing any previous one
    pub fn register(&self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
        self.executors.write().insert(step_type, executor);
    }

    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.read().get(&step_type).cloned()
    }

    pub fn contains(&self, step_type: StepType) -> bool {
        self.executors.read().contains_key(&step_type)
    }

    pub fn len(&self) -> usize {
        self.executors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.read().is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let executors = self.executors.read();
        f.debug_struct("ExecutorRegistry")
            .field("step_types", &executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl StepExecutor for EchoExecutor {
        async fn execute(
            &self,
            step: &WorkflowStep,
            _ctx: &StepContext,
            _task: &Task,
        ) -> anyhow::Result<StepOutcome> {
            Ok(StepOutcome::ok(serde_json::json!({ "step": step.id })))
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());

        registry.register(StepType::Analysis, Arc::new(EchoExecutor));
        assert!(registry.contains(StepType::Analysis));
        assert!(!registry.contains(StepType::Codegen));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_outcome_builders() {
        let ok = StepOutcome::ok(serde_json::json!(1));
        assert!(ok.success);
        assert_eq!(ok.result, Some(serde_json::json!(1)));

        let failed = StepOutcome::failed("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let with_meta = StepOutcome::ok_empty().with_metadata(serde_json::json!({ "n": 2 }));
        assert_eq!(with_meta.metadata, Some(serde_json::json!({ "n": 2 })));
    }
}
