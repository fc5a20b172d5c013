//! Blocker detection over milestone state
//!
//! Two analyses run on every pass:
//!
//! - **Dependency-based**: a non-completed, non-blocked milestone with an
//!   unmet dependency transitions to blocked.
//! - **Time-overrun**: an in-progress milestone more than 50% past its
//!   expected completion time transitions to blocked.
//!
//! Entering blocked creates one auto-detected [`Blocker`] (severity
//! medium) unless an active blocker already covers the milestone; leaving
//! blocked auto-resolves every active blocker covering it. The detector
//! runs periodically and reactively on milestone-update events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use mergeflow_core::events::topics;
use mergeflow_core::model::{Blocker, Milestone, MilestoneState, MilestoneStatus};
use mergeflow_core::{EventBus, OrchestrationEvent, Result};
use mergeflow_storage::BlockerRepo;

use crate::dag::MilestoneService;

/// What a detection pass found
#[derive(Debug, Default, Clone)]
pub struct DetectionReport {
    /// Milestones transitioned to blocked this pass
    pub newly_blocked: Vec<String>,

    /// Auto blockers created this pass
    pub blockers_created: usize,
}

/// Dependency and time-overrun blocker detection
pub struct BlockerDetector {
    service: Arc<MilestoneService>,
    blockers: Arc<dyn BlockerRepo>,
    bus: Arc<EventBus>,
}

impl BlockerDetector {
    pub fn new(
        service: Arc<MilestoneService>,
        blockers: Arc<dyn BlockerRepo>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            service,
            blockers,
            bus,
        }
    }

    /// Subscribe the reactive wiring: auto-resolution when a milestone
    /// leaves blocked, and a detection pass on every milestone update
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let detector = Arc::clone(self);
        bus.subscribe(topics::MILESTONE_UPDATED, move |event| {
            let detector = Arc::clone(&detector);
            async move {
                let OrchestrationEvent::MilestoneUpdated {
                    workflow_id,
                    milestone_id,
                    before,
                    after,
                } = event
                else {
                    return Ok(());
                };

                if before.status == MilestoneStatus::Blocked
                    && after.status != MilestoneStatus::Blocked
                {
                    detector.resolve_covering(&workflow_id, &milestone_id).await?;
                }

                // Reactive pass; milestones already blocked are skipped,
                // so this converges
                if after.status != MilestoneStatus::Blocked {
                    detector.run_detection(&workflow_id).await?;
                }
                Ok(())
            }
        });
    }

    /// Run both analyses over one workflow's milestones
    #[instrument(skip(self))]
    pub async fn run_detection(&self, workflow_id: &str) -> Result<DetectionReport> {
        let mut report = DetectionReport::default();

        self.detect_dependency_blocks(workflow_id, &mut report).await?;
        self.detect_time_overruns(workflow_id, &mut report).await?;

        if !report.newly_blocked.is_empty() {
            info!(
                workflow_id,
                blocked = report.newly_blocked.len(),
                created = report.blockers_created,
                "blocker detection pass found new blocks"
            );
        }
        Ok(report)
    }

    async fn detect_dependency_blocks(
        &self,
        workflow_id: &str,
        report: &mut DetectionReport,
    ) -> Result<()> {
        let snapshot = self.service.snapshot(workflow_id).await?;
        let states: HashMap<&str, &MilestoneState> = snapshot
            .iter()
            .map(|(m, s)| (m.id.as_str(), s))
            .collect();
        let names: HashMap<&str, &str> = snapshot
            .iter()
            .map(|(m, _)| (m.id.as_str(), m.name.as_str()))
            .collect();

        let mut to_block: Vec<(String, String, String)> = vec![];

        for (milestone, state) in &snapshot {
            if matches!(
                state.status,
                MilestoneStatus::Completed | MilestoneStatus::Blocked
            ) || milestone.dependencies.is_empty()
            {
                continue;
            }

            let unmet: Vec<&str> = milestone
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| {
                    states
                        .get(dep)
                        .map(|s| s.status != MilestoneStatus::Completed)
                        .unwrap_or(true)
                })
                .collect();

            if unmet.is_empty() {
                continue;
            }

            let unmet_names: Vec<&str> = unmet
                .iter()
                .map(|id| names.get(id).copied().unwrap_or(*id))
                .collect();
            to_block.push((
                milestone.id.clone(),
                format!("Blocked by dependencies: {}", unmet_names.join(", ")),
                unmet.join(","),
            ));
        }

        for (id, reason, blocked_by) in to_block {
            self.block(workflow_id, &id, &reason, &blocked_by, report)
                .await?;
        }
        Ok(())
    }

    async fn detect_time_overruns(
        &self,
        workflow_id: &str,
        report: &mut DetectionReport,
    ) -> Result<()> {
        let snapshot = self.service.snapshot(workflow_id).await?;
        let now = Utc::now();

        for (milestone, state) in &snapshot {
            if state.status != MilestoneStatus::InProgress {
                continue;
            }
            let (Some(started_at), Some(expected)) =
                (state.started_at, milestone.expected_completion_time)
            else {
                continue;
            };

            let expected_ms = expected.as_millis() as f64;
            if expected_ms <= 0.0 {
                continue;
            }
            let elapsed_ms = (now - started_at).num_milliseconds() as f64;
            let overdue_factor = (elapsed_ms - expected_ms) / expected_ms;

            if overdue_factor > 0.5 {
                let reason = format!(
                    "Milestone is {}% overdue",
                    (overdue_factor * 100.0).round() as i64
                );
                self.block(workflow_id, &milestone.id, &reason, "time_overrun", report)
                    .await?;
            }
        }
        Ok(())
    }

    async fn block(
        &self,
        workflow_id: &str,
        milestone_id: &str,
        reason: &str,
        blocked_by: &str,
        report: &mut DetectionReport,
    ) -> Result<()> {
        debug!(workflow_id, milestone_id, reason, "blocking milestone");
        self.service.block(milestone_id, reason, blocked_by).await?;
        report.newly_blocked.push(milestone_id.to_string());

        // One auto blocker per milestone: skip when an active blocker
        // already covers it
        let active = self.blockers.list_active(workflow_id).await?;
        if active.iter().any(|b| b.covers(milestone_id)) {
            return Ok(());
        }

        let blocker = Blocker::auto_detected(workflow_id, milestone_id, reason, blocked_by);
        let created = self.blockers.create(blocker).await?;
        report.blockers_created += 1;
        self.bus
            .publish(OrchestrationEvent::BlockerDetected { blocker: created })
            .await;
        Ok(())
    }

    /// Auto-resolve every active blocker covering a milestone that left
    /// the blocked state
    async fn resolve_covering(&self, workflow_id: &str, milestone_id: &str) -> Result<()> {
        let active = self.blockers.list_active(workflow_id).await?;
        for blocker in active.into_iter().filter(|b| b.covers(milestone_id)) {
            let resolved = self
                .blockers
                .resolve(blocker.id, Some("Milestone is no longer blocked"))
                .await?;
            debug!(workflow_id, milestone_id, blocker_id = %resolved.id, "auto-resolved blocker");
            self.bus
                .publish(OrchestrationEvent::BlockerResolved { blocker: resolved })
                .await;
        }
        Ok(())
    }

}

impl std::fmt::Debug for BlockerDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockerDetector").finish_non_exhaustive()
    }
}
