//! Blockers detected over the milestone graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Blocker severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BlockerSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for BlockerSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BlockerSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown blocker severity: {other}")),
        }
    }
}

/// A detected impediment affecting one or more milestones
///
/// Active ≡ `resolved_at` unset. Blockers reference milestones by id but
/// do not own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub id: Uuid,
    pub workflow_id: String,

    /// Non-empty by construction
    pub affected_milestone_ids: Vec<String>,

    pub severity: BlockerSeverity,
    pub description: String,

    /// Free-form hint about what is blocking (ids, "time_overrun", ...)
    pub blocked_by: Option<String>,

    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,

    pub metadata: serde_json::Value,
}

impl Blocker {
    /// Blocker created by the automatic detector
    ///
    /// Marks `metadata.autoDetected = true` so observers can tell it from
    /// manually filed blockers.
    pub fn auto_detected(
        workflow_id: impl Into<String>,
        milestone_id: impl Into<String>,
        description: impl Into<String>,
        blocked_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            affected_milestone_ids: vec![milestone_id.into()],
            severity: BlockerSeverity::Medium,
            description: description.into(),
            blocked_by: Some(blocked_by.into()),
            detected_at: Utc::now(),
            resolved_at: None,
            resolution: None,
            metadata: serde_json::json!({ "autoDetected": true }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn is_auto_detected(&self) -> bool {
        self.metadata
            .get("autoDetected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn covers(&self, milestone_id: &str) -> bool {
        self.affected_milestone_ids
            .iter()
            .any(|id| id == milestone_id)
    }
}
