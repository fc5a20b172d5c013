//! Milestones and their per-milestone state

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_util::option_duration_millis;

/// Milestone progress status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MilestoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "blocked" => Ok(Self::Blocked),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown milestone status: {other}")),
        }
    }
}

/// A node of the progress graph for one workflow
///
/// Milestones are append-only once registered; weight is a contribution
/// factor in `[0, 100]` used by the progress rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub workflow_id: String,

    #[serde(default)]
    pub parent_id: Option<String>,

    /// Contribution to workflow progress, `[0, 100]`
    pub weight: f64,

    /// Expected duration once in progress; drives overrun detection and
    /// the critical-path node weight
    #[serde(default, with = "option_duration_millis")]
    pub expected_completion_time: Option<Duration>,

    /// Milestone ids that must complete before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Milestone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        workflow_id: impl Into<String>,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            workflow_id: workflow_id.into(),
            parent_id: None,
            weight,
            expected_completion_time: None,
            dependencies: vec![],
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expected_completion(mut self, expected: Duration) -> Self {
        self.expected_completion_time = Some(expected);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Mutable state attached to exactly one milestone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneState {
    pub status: MilestoneStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// `[0, 100]`
    pub percent_complete: f64,

    pub blocker_reason: Option<String>,
    pub blocked_by: Option<String>,
}

impl Default for MilestoneState {
    fn default() -> Self {
        Self {
            status: MilestoneStatus::NotStarted,
            started_at: None,
            completed_at: None,
            percent_complete: 0.0,
            blocker_reason: None,
            blocked_by: None,
        }
    }
}

impl MilestoneState {
    /// Apply a status transition, stamping timestamps per the invariants:
    /// entering `in_progress` stamps a missing `started_at`; entering
    /// `completed` stamps `completed_at` and forces `percent_complete`
    /// to 100. Leaving `blocked` clears the blocker annotations.
    pub fn transition(&mut self, status: MilestoneStatus, now: DateTime<Utc>) {
        if self.status == MilestoneStatus::Blocked && status != MilestoneStatus::Blocked {
            self.blocker_reason = None;
            self.blocked_by = None;
        }

        match status {
            MilestoneStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            MilestoneStatus::Completed => {
                self.completed_at = Some(now);
                self.percent_complete = 100.0;
            }
            _ => {}
        }

        self.status = status;
    }

    /// Progress contribution in `[0, 1]` for the weighted rollup
    pub fn progress_fraction(&self) -> f64 {
        match self.status {
            MilestoneStatus::Completed => 1.0,
            MilestoneStatus::InProgress => (self.percent_complete / 100.0).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_stamps_started_at() {
        let now = Utc::now();
        let mut state = MilestoneState::default();
        state.transition(MilestoneStatus::InProgress, now);

        assert_eq!(state.status, MilestoneStatus::InProgress);
        assert_eq!(state.started_at, Some(now));
    }

    #[test]
    fn test_transition_preserves_existing_started_at() {
        let first = Utc::now();
        let mut state = MilestoneState::default();
        state.transition(MilestoneStatus::InProgress, first);

        let later = first + chrono::Duration::seconds(60);
        state.transition(MilestoneStatus::InProgress, later);
        assert_eq!(state.started_at, Some(first));
    }

    #[test]
    fn test_transition_to_completed() {
        let now = Utc::now();
        let mut state = MilestoneState {
            percent_complete: 40.0,
            ..Default::default()
        };
        state.transition(MilestoneStatus::Completed, now);

        assert_eq!(state.completed_at, Some(now));
        assert_eq!(state.percent_complete, 100.0);
        assert_eq!(state.progress_fraction(), 1.0);
    }

    #[test]
    fn test_unblocking_clears_annotations() {
        let now = Utc::now();
        let mut state = MilestoneState {
            status: MilestoneStatus::Blocked,
            blocker_reason: Some("Blocked by dependencies: setup".to_string()),
            blocked_by: Some("setup".to_string()),
            ..Default::default()
        };

        state.transition(MilestoneStatus::InProgress, now);
        assert!(state.blocker_reason.is_none());
        assert!(state.blocked_by.is_none());
    }

    #[test]
    fn test_progress_fraction() {
        let state = MilestoneState {
            status: MilestoneStatus::InProgress,
            percent_complete: 50.0,
            ..Default::default()
        };
        assert_eq!(state.progress_fraction(), 0.5);

        let blocked = MilestoneState {
            status: MilestoneStatus::Blocked,
            percent_complete: 80.0,
            ..Default::default()
        };
        assert_eq!(blocked.progress_fraction(), 0.0);
    }
}
