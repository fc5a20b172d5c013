//! Task entity and its status/priority enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workflow::StepType;

/// Well-known keys inside `Task::metadata`
///
/// The engine interprets only these; everything else in the metadata
/// mapping is opaque and preserved verbatim.
pub mod metadata_keys {
    /// Uuid of the owning workflow execution
    pub const WORKFLOW_EXECUTION_ID: &str = "workflow_execution_id";

    /// Id of the step this task materializes
    pub const WORKFLOW_STEP_ID: &str = "workflow_step_id";

    /// Opaque per-step configuration copied from the definition
    pub const STEP_CONFIG: &str = "step_config";
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status ends the task's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a dependency in this status unblocks its dependents
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Task priority
///
/// Ordered so that `Ord` matches urgency (`Critical` is greatest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Fixed queue score mapping: critical=100, high=75, medium=50, low=25
    pub fn score(&self) -> i32 {
        match self {
            Self::Critical => 100,
            Self::High => 75,
            Self::Medium => 50,
            Self::Low => 25,
        }
    }

    /// Priority derived from the step type a task materializes
    pub fn for_step_type(step_type: StepType) -> Self {
        match step_type {
            StepType::Analysis | StepType::Validation => Self::High,
            StepType::Codegen | StepType::Custom => Self::Medium,
            StepType::Notification => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown task priority: {other}")),
        }
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub pr_id: Uuid,
    pub name: String,
    pub description: String,
    pub task_type: StepType,
    pub dependencies: Vec<Uuid>,
    pub priority: TaskPriority,
    pub metadata: serde_json::Value,
}

/// Materialized unit of work for one step within one workflow execution
///
/// Lifecycle: pending → running → {completed | failed}; any state →
/// cancelled. A task becomes *runnable* iff it is pending and every
/// dependency task is completed or cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pr_id: Uuid,
    pub name: String,
    pub description: String,
    pub task_type: StepType,

    /// Task ids this task waits on (translated from step dependencies)
    pub dependencies: Vec<Uuid>,

    pub status: TaskStatus,
    pub priority: TaskPriority,

    /// Opaque mapping; see [`metadata_keys`] for the fields the engine reads
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// The owning workflow execution, if recorded in metadata
    pub fn workflow_execution_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata_keys::WORKFLOW_EXECUTION_ID)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// The step id this task materializes, if recorded in metadata
    pub fn workflow_step_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::WORKFLOW_STEP_ID)
            .and_then(|v| v.as_str())
    }

    /// Per-step configuration copied from the definition
    pub fn step_config(&self) -> serde_json::Value {
        self.metadata
            .get(metadata_keys::STEP_CONFIG)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_scores() {
        assert_eq!(TaskPriority::Critical.score(), 100);
        assert_eq!(TaskPriority::High.score(), 75);
        assert_eq!(TaskPriority::Medium.score(), 50);
        assert_eq!(TaskPriority::Low.score(), 25);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_priority_for_step_type() {
        assert_eq!(
            TaskPriority::for_step_type(StepType::Analysis),
            TaskPriority::High
        );
        assert_eq!(
            TaskPriority::for_step_type(StepType::Validation),
            TaskPriority::High
        );
        assert_eq!(
            TaskPriority::for_step_type(StepType::Codegen),
            TaskPriority::Medium
        );
        assert_eq!(
            TaskPriority::for_step_type(StepType::Notification),
            TaskPriority::Low
        );
        assert_eq!(
            TaskPriority::for_step_type(StepType::Custom),
            TaskPriority::Medium
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(TaskStatus::Completed.satisfies_dependency());
        assert!(TaskStatus::Cancelled.satisfies_dependency());
        assert!(!TaskStatus::Failed.satisfies_dependency());
        assert!(!TaskStatus::Pending.satisfies_dependency());
        assert!(!TaskStatus::Running.satisfies_dependency());
    }

    #[test]
    fn test_metadata_accessors() {
        let execution_id = Uuid::now_v7();
        let task = Task {
            id: Uuid::now_v7(),
            pr_id: Uuid::now_v7(),
            name: "analyze".to_string(),
            description: String::new(),
            task_type: StepType::Analysis,
            dependencies: vec![],
            status: TaskStatus::Pending,
            priority: TaskPriority::High,
            metadata: serde_json::json!({
                "workflow_execution_id": execution_id.to_string(),
                "workflow_step_id": "analyze",
                "step_config": { "depth": 3 },
            }),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        assert_eq!(task.workflow_execution_id(), Some(execution_id));
        assert_eq!(task.workflow_step_id(), Some("analyze"));
        assert_eq!(task.step_config()["depth"], 3);
    }
}
