//! Milestone registration and state transitions over the repository

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use mergeflow_core::model::{Milestone, MilestoneState, MilestoneStatus};
use mergeflow_core::{EventBus, OrchestrationError, OrchestrationEvent, Result};
use mergeflow_storage::MilestoneRepo;

use super::graph;

/// Snapshot of a workflow's milestones and their states
pub type MilestoneSnapshot = Vec<(Milestone, MilestoneState)>;

/// Validated access to the milestone graph
///
/// Registration enforces the graph invariants (weight range, known
/// dependencies and parent, no self-dependency; uniqueness comes from
/// the repository); the graph is append-only once registered. State
/// transitions apply the stamping rules and publish
/// `milestone_updated` events with before/after state.
pub struct MilestoneService {
    milestones: Arc<dyn MilestoneRepo>,
    bus: Arc<EventBus>,
}

impl MilestoneService {
    pub fn new(milestones: Arc<dyn MilestoneRepo>, bus: Arc<EventBus>) -> Self {
        Self { milestones, bus }
    }

    /// Register a milestone after validating the graph invariants
    #[instrument(skip(self, milestone), fields(milestone_id = %milestone.id))]
    pub async fn register(&self, milestone: Milestone) -> Result<Milestone> {
        if !(0.0..=100.0).contains(&milestone.weight) {
            return Err(OrchestrationError::Validation(format!(
                "milestone '{}' weight {} outside [0, 100]",
                milestone.id, milestone.weight
            )));
        }
        if milestone.dependencies.iter().any(|d| d == &milestone.id) {
            return Err(OrchestrationError::Validation(format!(
                "milestone '{}' depends on itself",
                milestone.id
            )));
        }
        for dep in &milestone.dependencies {
            if self.milestones.get(dep).await?.is_none() {
                return Err(OrchestrationError::Dependency(format!(
                    "milestone '{}' depends on unregistered '{dep}'",
                    milestone.id
                )));
            }
        }
        if let Some(parent) = &milestone.parent_id {
            if self.milestones.get(parent).await?.is_none() {
                return Err(OrchestrationError::Dependency(format!(
                    "milestone '{}' has unregistered parent '{parent}'",
                    milestone.id
                )));
            }
        }

        let registered = self.milestones.register(milestone).await?;
        self.bus
            .publish(OrchestrationEvent::MilestoneRegistered {
                milestone: registered.clone(),
            })
            .await;
        Ok(registered)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Milestone>> {
        Ok(self.milestones.get(id).await?)
    }

    pub async fn state(&self, id: &str) -> Result<Option<MilestoneState>> {
        Ok(self.milestones.state_get(id).await?)
    }

    /// Transition a milestone's status, applying the stamping rules
    pub async fn transition(&self, id: &str, status: MilestoneStatus) -> Result<MilestoneState> {
        self.apply(id, |state, now| state.transition(status, now))
            .await
    }

    /// Transition to blocked with the detector's annotations
    pub async fn block(
        &self,
        id: &str,
        reason: impl Into<String>,
        blocked_by: impl Into<String>,
    ) -> Result<MilestoneState> {
        let reason = reason.into();
        let blocked_by = blocked_by.into();
        self.apply(id, move |state, now| {
            state.transition(MilestoneStatus::Blocked, now);
            state.blocker_reason = Some(reason);
            state.blocked_by = Some(blocked_by);
        })
        .await
    }

    /// Update the completion percentage of an in-progress milestone
    pub async fn set_percent(&self, id: &str, percent: f64) -> Result<MilestoneState> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(OrchestrationError::Validation(format!(
                "percent_complete {percent} outside [0, 100]"
            )));
        }
        self.apply(id, move |state, _now| state.percent_complete = percent)
            .await
    }

    async fn apply<F>(&self, id: &str, mutate: F) -> Result<MilestoneState>
    where
        F: FnOnce(&mut MilestoneState, chrono::DateTime<chrono::Utc>),
    {
        let milestone = self
            .milestones
            .get(id)
            .await?
            .ok_or_else(|| OrchestrationError::not_found("milestone", id))?;

        let before = self
            .milestones
            .state_get(id)
            .await?
            .unwrap_or_default();

        let mut after = before.clone();
        mutate(&mut after, Utc::now());

        if after == before {
            return Ok(before);
        }

        let saved = self.milestones.state_set(id, after.clone()).await?;
        debug!(milestone_id = %id, status = %saved.status, "milestone state updated");

        self.bus
            .publish(OrchestrationEvent::MilestoneUpdated {
                workflow_id: milestone.workflow_id,
                milestone_id: id.to_string(),
                before,
                after: saved.clone(),
            })
            .await;
        Ok(saved)
    }

    /// Milestones and states for one workflow
    pub async fn snapshot(&self, workflow_id: &str) -> Result<MilestoneSnapshot> {
        Ok(self.milestones.states_by_workflow(workflow_id).await?)
    }

    /// Weighted progress across the workflow's milestones
    pub async fn workflow_progress(&self, workflow_id: &str) -> Result<f64> {
        let snapshot = self.snapshot(workflow_id).await?;
        Ok(graph::workflow_progress(&snapshot))
    }

    /// The weighted longest root-to-leaf path
    pub async fn critical_path(&self, workflow_id: &str) -> Result<Vec<String>> {
        let milestones = self.milestones.list_by_workflow(workflow_id).await?;
        graph::critical_path(&milestones)
    }

    /// Progress restricted to the critical path
    pub async fn critical_path_progress(&self, workflow_id: &str) -> Result<f64> {
        let snapshot = self.snapshot(workflow_id).await?;
        graph::critical_path_progress(&snapshot)
    }
}

impl std::fmt::Debug for MilestoneService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilestoneService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergeflow_core::events::topics;
    use mergeflow_storage::Stores;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn service() -> (MilestoneService, Arc<EventBus>) {
        let stores = Stores::in_memory();
        let bus = Arc::new(EventBus::new());
        (
            MilestoneService::new(stores.milestones, Arc::clone(&bus)),
            bus,
        )
    }

    #[tokio::test]
    async fn test_register_validates_weight() {
        let (service, _bus) = service();
        let rejected = service
            .register(Milestone::new("m-1", "M1", "wf", 150.0))
            .await;
        assert!(matches!(rejected, Err(OrchestrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_dependency() {
        let (service, _bus) = service();
        let rejected = service
            .register(Milestone::new("m-1", "M1", "wf", 10.0).with_dependencies(vec!["ghost"]))
            .await;
        assert!(matches!(rejected, Err(OrchestrationError::Dependency(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_self_dependency() {
        let (service, _bus) = service();
        let rejected = service
            .register(Milestone::new("m-1", "M1", "wf", 10.0).with_dependencies(vec!["m-1"]))
            .await;
        assert!(matches!(rejected, Err(OrchestrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_duplicate_conflicts() {
        let (service, _bus) = service();
        service
            .register(Milestone::new("m-1", "M1", "wf", 10.0))
            .await
            .unwrap();

        let duplicate = service.register(Milestone::new("m-1", "M1", "wf", 10.0)).await;
        assert!(matches!(duplicate, Err(OrchestrationError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_parent() {
        let (service, _bus) = service();
        let rejected = service
            .register(Milestone::new("m-1", "M1", "wf", 10.0).with_parent("ghost"))
            .await;
        assert!(matches!(rejected, Err(OrchestrationError::Dependency(_))));
    }

    #[tokio::test]
    async fn test_transition_emits_update_event() {
        let (service, bus) = service();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        bus.subscribe(topics::MILESTONE_UPDATED, move |event| {
            let counter = Arc::clone(&counter);
            async move {
                if let OrchestrationEvent::MilestoneUpdated { before, after, .. } = event {
                    assert_eq!(before.status, MilestoneStatus::NotStarted);
                    assert_eq!(after.status, MilestoneStatus::InProgress);
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        });

        service
            .register(Milestone::new("m-1", "M1", "wf", 10.0))
            .await
            .unwrap();

        let state = service
            .transition("m-1", MilestoneStatus::InProgress)
            .await
            .unwrap();
        assert!(state.started_at.is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_noop_transition_does_not_emit() {
        let (service, bus) = service();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        bus.subscribe(topics::MILESTONE_UPDATED, move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        service
            .register(Milestone::new("m-1", "M1", "wf", 10.0))
            .await
            .unwrap();

        // NotStarted -> NotStarted changes nothing
        service
            .transition("m-1", MilestoneStatus::NotStarted)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_block_sets_annotations() {
        let (service, _bus) = service();
        service
            .register(Milestone::new("m-1", "M1", "wf", 10.0))
            .await
            .unwrap();

        let state = service
            .block("m-1", "Blocked by dependencies: setup", "setup")
            .await
            .unwrap();
        assert_eq!(state.status, MilestoneStatus::Blocked);
        assert_eq!(
            state.blocker_reason.as_deref(),
            Some("Blocked by dependencies: setup")
        );
        assert_eq!(state.blocked_by.as_deref(), Some("setup"));
    }

    #[tokio::test]
    async fn test_progress_and_critical_path_over_repo() {
        let (service, _bus) = service();

        service
            .register(
                Milestone::new("m1", "M1", "wf", 10.0)
                    .with_expected_completion(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        service
            .register(
                Milestone::new("m2", "M2", "wf", 20.0)
                    .with_expected_completion(Duration::from_millis(200))
                    .with_dependencies(vec!["m1"]),
            )
            .await
            .unwrap();
        service
            .register(
                Milestone::new("m3", "M3", "wf", 30.0)
                    .with_expected_completion(Duration::from_millis(150))
                    .with_dependencies(vec!["m1"]),
            )
            .await
            .unwrap();
        service
            .register(
                Milestone::new("m4", "M4", "wf", 40.0)
                    .with_expected_completion(Duration::from_millis(50))
                    .with_dependencies(vec!["m2", "m3"]),
            )
            .await
            .unwrap();

        let path = service.critical_path("wf").await.unwrap();
        assert_eq!(path, vec!["m1", "m2", "m4"]);

        service
            .transition("m1", MilestoneStatus::Completed)
            .await
            .unwrap();
        // m1 contributes 10 of the total 100 weight
        let progress = service.workflow_progress("wf").await.unwrap();
        assert!((progress - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_set_percent_validation() {
        let (service, _bus) = service();
        service
            .register(Milestone::new("m-1", "M1", "wf", 10.0))
            .await
            .unwrap();

        assert!(service.set_percent("m-1", 101.0).await.is_err());
        let state = service.set_percent("m-1", 40.0).await.unwrap();
        assert_eq!(state.percent_complete, 40.0);
    }
}
