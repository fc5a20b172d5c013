//! Workflow definitions (immutable templates) and executions (runtime instances)

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::serde_util::option_duration_millis;

/// The kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Analysis,
    Codegen,
    Validation,
    Notification,
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Codegen => "codegen",
            Self::Validation => "validation",
            Self::Notification => "notification",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "codegen" => Ok(Self::Codegen),
            "validation" => Ok(Self::Validation),
            "notification" => Ok(Self::Notification),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown step type: {other}")),
        }
    }
}

/// One step of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within the owning definition
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub step_type: StepType,

    /// Ids of sibling steps that must finish first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Wall-clock bound around the executor call
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Per-step retry budget override
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    /// Opaque executor configuration, copied into task metadata
    #[serde(default)]
    pub config: serde_json::Value,
}

impl WorkflowStep {
    /// Minimal step with no dependencies or configuration
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            step_type,
            dependencies: vec![],
            timeout: None,
            retry_attempts: None,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Event trigger attached to a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub event_type: String,

    /// Optional matcher applied to the triggering event payload
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
}

impl WorkflowTrigger {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: serde_json::Value) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Whether this trigger fires for an event
    ///
    /// The event type must match exactly; when conditions are set, every
    /// condition key must be present in the payload with an equal value.
    pub fn matches(&self, event_type: &str, payload: &serde_json::Value) -> bool {
        if self.event_type != event_type {
            return false;
        }
        let Some(serde_json::Value::Object(conditions)) = &self.conditions else {
            return true;
        };
        conditions
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

/// Immutable workflow template
///
/// Invariants, checked by [`WorkflowDefinition::validate`]:
/// - step ids are unique within the definition
/// - every dependency references a sibling step
/// - the dependency graph is acyclic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique name across registered definitions
    pub name: String,

    pub version: String,

    /// Ordered steps; materialization preserves this order
    pub steps: Vec<WorkflowStep>,

    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            steps: vec![],
            triggers: vec![],
        }
    }

    pub fn with_steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_trigger(mut self, trigger: WorkflowTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Look up a step by id
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Whether any trigger fires for an event
    pub fn matches_event(&self, event_type: &str, payload: &serde_json::Value) -> bool {
        self.triggers
            .iter()
            .any(|t| t.matches(event_type, payload))
    }

    /// Check the definition invariants
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(OrchestrationError::Validation(format!(
                    "duplicate step id '{}' in workflow '{}'",
                    step.id, self.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(OrchestrationError::Validation(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(OrchestrationError::Dependency(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    /// DFS cycle detection with a temporary-mark set
    fn check_acyclic(&self) -> Result<(), OrchestrationError> {
        let deps: HashMap<&str, &Vec<String>> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), &s.dependencies))
            .collect();

        let mut permanent = HashSet::new();
        let mut temporary = HashSet::new();

        fn visit<'a>(
            node: &'a str,
            deps: &HashMap<&'a str, &'a Vec<String>>,
            permanent: &mut HashSet<&'a str>,
            temporary: &mut HashSet<&'a str>,
        ) -> Result<(), OrchestrationError> {
            if permanent.contains(node) {
                return Ok(());
            }
            if !temporary.insert(node) {
                return Err(OrchestrationError::Validation(format!(
                    "dependency cycle involving step '{node}'"
                )));
            }
            if let Some(node_deps) = deps.get(node) {
                for dep in node_deps.iter() {
                    visit(dep, deps, permanent, temporary)?;
                }
            }
            temporary.remove(node);
            permanent.insert(node);
            Ok(())
        }

        for step in &self.steps {
            visit(&step.id, &deps, &mut permanent, &mut temporary)?;
        }
        Ok(())
    }
}

/// Workflow execution lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Runtime instance of a workflow definition bound to one pull request
///
/// Created at start, mutated only by the engine, terminal on the first
/// transition out of `Active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub pr_id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowExecutionStatus,

    /// Hint only; never authoritative
    pub current_step: Option<String>,

    /// Step ids completed so far, in completion order
    pub steps_completed: Vec<String>,

    /// Step ids that failed
    pub steps_failed: Vec<String>,

    /// Carries `workflow_version` and caller-supplied `variables`
    pub metadata: serde_json::Value,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Caller-supplied variables recorded at start
    pub fn variables(&self) -> serde_json::Value {
        self.metadata
            .get("variables")
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}
