//! Pull-request integration types
//!
//! Projects, pull requests, and the external observer contract
//! ([`ModuleOutput`]). The orchestrator is fed PR events and reports its
//! state back through these shapes; everything else about the forge is an
//! external collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Module identifier reported in [`ModuleOutput`]
pub const MODULE_NAME: &str = "database_workflow_orchestration";

/// A tracked repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,

    /// Forge-side repository identifier; unique across projects
    pub repository_id: String,

    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pull request status on the forge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Closed,
    Merged,
    Draft,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
            Self::Draft => "draft",
        }
    }
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "merged" => Ok(Self::Merged),
            "draft" => Ok(Self::Draft),
            other => Err(format!("unknown pr status: {other}")),
        }
    }
}

/// Analysis progress for one pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown analysis status: {other}")),
        }
    }
}

/// A tracked pull request; unique on `(project_id, pr_number)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: Uuid,
    pub project_id: Uuid,
    pub pr_number: i64,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
    pub status: PrStatus,
    pub analysis_status: AnalysisStatus,
    pub base_branch: String,
    pub head_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload delivered with an external PR event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrEventData {
    /// Forge-side identifier for the pull request, when the forge has one
    #[serde(default)]
    pub pr_id: Option<String>,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    pub author: String,
    pub status: PrStatus,
    pub base_branch: String,
    pub head_branch: String,
}

/// Cross-system link row, upserted by natural key
///
/// Used by observers to correlate orchestrator state with external
/// trackers; never on a hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlation {
    pub id: Uuid,
    pub linear_issue_id: String,
    pub pr_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub workflow_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-codegen-task summary inside [`ModuleOutput`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodegenTaskSummary {
    pub task_id: Uuid,
    pub status: super::TaskStatus,
    pub prompt: String,
    pub priority: super::TaskPriority,
}

/// Database-side summary inside [`ModuleOutput`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSummary {
    pub pr_id: Uuid,
    pub analysis_complete: bool,
    pub total_findings: u32,
    pub critical_issues: u32,
    pub codegen_tasks: Vec<CodegenTaskSummary>,
}

/// External contract reported to observers after processing a PR event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub module: String,
    pub workflow_status: super::WorkflowExecutionStatus,
    pub database: DatabaseSummary,
}

impl ModuleOutput {
    pub fn new(workflow_status: super::WorkflowExecutionStatus, database: DatabaseSummary) -> Self {
        Self {
            module: MODULE_NAME.to_string(),
            workflow_status,
            database,
        }
    }
}
