//! Progress metrics and predictions
//!
//! A registry of metric calculators and prediction generators keyed by
//! name, resolved at dispatch. All computations are pure over the
//! [`ProgressSnapshot`] they observe; nothing here mutates state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::instrument;

use mergeflow_core::model::{Blocker, Milestone, MilestoneState, MilestoneStatus};
use mergeflow_core::{EventBus, OrchestrationError, OrchestrationEvent, Result};

use crate::dag::graph;

/// Built-in metric names
pub mod metric_names {
    pub const OVERALL_PROGRESS: &str = "overall_progress";
    pub const COMPLETED_MILESTONES: &str = "completed_milestones";
    pub const BLOCKED_MILESTONES: &str = "blocked_milestones";
    pub const AVERAGE_COMPLETION_TIME_MS: &str = "average_completion_time_ms";
    pub const CRITICAL_PATH_PROGRESS: &str = "critical_path_progress";
}

/// Built-in prediction names
pub mod prediction_names {
    pub const ESTIMATED_COMPLETION: &str = "estimated_completion";
    pub const RISK_SCORE: &str = "risk_score";
}

/// Immutable view of a workflow's progress state at one instant
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub workflow_id: String,
    pub entries: Vec<(Milestone, MilestoneState)>,
    pub blockers: Vec<Blocker>,
    pub now: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(
        workflow_id: impl Into<String>,
        entries: Vec<(Milestone, MilestoneState)>,
        blockers: Vec<Blocker>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            entries,
            blockers,
            now: Utc::now(),
        }
    }

    fn count_status(&self, status: MilestoneStatus) -> usize {
        self.entries.iter().filter(|(_, s)| s.status == status).count()
    }

    fn average_completion_ms(&self) -> Option<f64> {
        let durations: Vec<f64> = self
            .entries
            .iter()
            .filter_map(|(_, s)| match (s.started_at, s.completed_at) {
                (Some(started), Some(completed)) => {
                    Some((completed - started).num_milliseconds().max(0) as f64)
                }
                _ => None,
            })
            .collect();

        if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        }
    }
}

/// Pure function from snapshot to metric/prediction value
pub type CalculatorFn = Arc<dyn Fn(&ProgressSnapshot) -> serde_json::Value + Send + Sync>;

/// Named metric calculators and prediction generators
///
/// Registration happens at initialization; dispatch resolves by name.
pub struct ProgressAggregator {
    metrics: RwLock<HashMap<String, CalculatorFn>>,
    predictions: RwLock<HashMap<String, CalculatorFn>>,
}

impl ProgressAggregator {
    /// Aggregator with the built-in metrics and predictions registered
    pub fn new() -> Self {
        let aggregator = Self {
            metrics: RwLock::new(HashMap::new()),
            predictions: RwLock::new(HashMap::new()),
        };
        aggregator.register_builtins();
        aggregator
    }

    fn register_builtins(&self) {
        self.register_metric(metric_names::OVERALL_PROGRESS, |snapshot| {
            serde_json::json!(graph::workflow_progress(&snapshot.entries))
        });
        self.register_metric(metric_names::COMPLETED_MILESTONES, |snapshot| {
            serde_json::json!(snapshot.count_status(MilestoneStatus::Completed))
        });
        self.register_metric(metric_names::BLOCKED_MILESTONES, |snapshot| {
            serde_json::json!(snapshot.count_status(MilestoneStatus::Blocked))
        });
        self.register_metric(metric_names::AVERAGE_COMPLETION_TIME_MS, |snapshot| {
            match snapshot.average_completion_ms() {
                Some(avg) => serde_json::json!(avg),
                None => serde_json::Value::Null,
            }
        });
        self.register_metric(metric_names::CRITICAL_PATH_PROGRESS, |snapshot| {
            match graph::critical_path_progress(&snapshot.entries) {
                Ok(progress) => serde_json::json!(progress),
                Err(_) => serde_json::Value::Null,
            }
        });

        self.register_prediction(prediction_names::ESTIMATED_COMPLETION, |snapshot| {
            estimated_completion(snapshot)
        });
        self.register_prediction(prediction_names::RISK_SCORE, |snapshot| {
            serde_json::json!(risk_score(snapshot))
        });
    }

    /// Register a metric calculator under a name
    pub fn register_metric<F>(&self, name: &str, calculator: F)
    where
        F: Fn(&ProgressSnapshot) -> serde_json::Value + Send + Sync + 'static,
    {
        self.metrics
            .write()
            .insert(name.to_string(), Arc::new(calculator));
    }

    /// Register a prediction generator under a name
    pub fn register_prediction<F>(&self, name: &str, generator: F)
    where
        F: Fn(&ProgressSnapshot) -> serde_json::Value + Send + Sync + 'static,
    {
        self.predictions
            .write()
            .insert(name.to_string(), Arc::new(generator));
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn prediction_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.predictions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Compute one metric by name
    pub fn calculate(&self, name: &str, snapshot: &ProgressSnapshot) -> Result<serde_json::Value> {
        let calculator = self
            .metrics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("metric", name))?;
        Ok(calculator(snapshot))
    }

    /// Compute one prediction by name
    pub fn predict(&self, name: &str, snapshot: &ProgressSnapshot) -> Result<serde_json::Value> {
        let generator = self
            .predictions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("prediction", name))?;
        Ok(generator(snapshot))
    }

    /// Compute every registered metric
    pub fn calculate_all(&self, snapshot: &ProgressSnapshot) -> Vec<(String, serde_json::Value)> {
        let metrics = self.metrics.read();
        let mut results: Vec<(String, serde_json::Value)> = metrics
            .iter()
            .map(|(name, calc)| (name.clone(), calc(snapshot)))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Compute every registered prediction
    pub fn predict_all(&self, snapshot: &ProgressSnapshot) -> Vec<(String, serde_json::Value)> {
        let predictions = self.predictions.read();
        let mut results: Vec<(String, serde_json::Value)> = predictions
            .iter()
            .map(|(name, generator)| (name.clone(), generator(snapshot)))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Compute everything and publish `metric_calculated` /
    /// `prediction_generated` events
    #[instrument(skip(self, snapshot, bus), fields(workflow_id = %snapshot.workflow_id))]
    pub async fn publish_all(&self, snapshot: &ProgressSnapshot, bus: &EventBus) {
        for (name, value) in self.calculate_all(snapshot) {
            bus.publish(OrchestrationEvent::MetricCalculated {
                workflow_id: snapshot.workflow_id.clone(),
                name,
                value,
            })
            .await;
        }
        for (name, value) in self.predict_all(snapshot) {
            bus.publish(OrchestrationEvent::PredictionGenerated {
                workflow_id: snapshot.workflow_id.clone(),
                name,
                value,
            })
            .await;
        }
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("metrics", &self.metric_names())
            .field("predictions", &self.prediction_names())
            .finish()
    }
}

/// ETA from remaining expected work, weighted by what is left
fn estimated_completion(snapshot: &ProgressSnapshot) -> serde_json::Value {
    let remaining_ms: f64 = snapshot
        .entries
        .iter()
        .filter(|(_, s)| s.status != MilestoneStatus::Completed)
        .filter_map(|(m, s)| {
            let expected = m.expected_completion_time?.as_millis() as f64;
            // Credit partial progress on in-flight milestones
            let fraction_left = 1.0 - s.progress_fraction();
            Some(expected * fraction_left)
        })
        .sum();

    if remaining_ms <= 0.0 {
        return serde_json::json!({
            "estimated_completion_at": snapshot.now.to_rfc3339(),
            "remaining_ms": 0,
        });
    }

    let eta = snapshot.now + chrono::Duration::milliseconds(remaining_ms as i64);
    serde_json::json!({
        "estimated_completion_at": eta.to_rfc3339(),
        "remaining_ms": remaining_ms as i64,
    })
}

/// Risk in `[0, 100]`: a blend of the blocked ratio and the overdue ratio
fn risk_score(snapshot: &ProgressSnapshot) -> f64 {
    if snapshot.entries.is_empty() {
        return 0.0;
    }
    let total = snapshot.entries.len() as f64;

    let blocked = snapshot
        .entries
        .iter()
        .filter(|(_, s)| s.status == MilestoneStatus::Blocked)
        .count() as f64;

    let overdue = snapshot
        .entries
        .iter()
        .filter(|(m, s)| {
            let (Some(started), Some(expected)) = (s.started_at, m.expected_completion_time)
            else {
                return false;
            };
            s.status == MilestoneStatus::InProgress
                && (snapshot.now - started).num_milliseconds() as f64
                    > expected.as_millis() as f64
        })
        .count() as f64;

    ((blocked / total) * 60.0 + (overdue / total) * 40.0).clamp(0.0, 100.0)
}
