//! In-process event bus
//!
//! Topic-keyed publish/subscribe used to decouple the engine from its
//! observers (blocker detector, progress aggregator, integration hooks).
//! Delivery is synchronous on the caller's task, in subscription order per
//! topic. Subscribers are async callables; their failures are caught and
//! logged, never propagated. There is no persistence and no cross-process
//! delivery — the bus lives and dies with the orchestrator that owns it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::model::{Blocker, Milestone, MilestoneState, WorkflowExecution};

/// Topic names for every event the bus carries
pub mod topics {
    pub const MILESTONE_REGISTERED: &str = "milestone_registered";
    pub const MILESTONE_UPDATED: &str = "milestone_updated";
    pub const BLOCKER_DETECTED: &str = "blocker_detected";
    pub const BLOCKER_RESOLVED: &str = "blocker_resolved";
    pub const METRIC_CALCULATED: &str = "metric_calculated";
    pub const PREDICTION_GENERATED: &str = "prediction_generated";
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const SYSTEM_ERROR: &str = "system_error";
}

/// Events published on the orchestrator bus
///
/// Payloads carry the canonical entity, plus before/after state where a
/// transition happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    MilestoneRegistered {
        milestone: Milestone,
    },

    MilestoneUpdated {
        workflow_id: String,
        milestone_id: String,
        before: MilestoneState,
        after: MilestoneState,
    },

    BlockerDetected {
        blocker: Blocker,
    },

    BlockerResolved {
        blocker: Blocker,
    },

    MetricCalculated {
        workflow_id: String,
        name: String,
        value: serde_json::Value,
    },

    PredictionGenerated {
        workflow_id: String,
        name: String,
        value: serde_json::Value,
    },

    WorkflowStarted {
        execution: WorkflowExecution,
    },

    WorkflowCompleted {
        execution: WorkflowExecution,
    },

    WorkflowFailed {
        execution: WorkflowExecution,
    },

    StepStarted {
        execution_id: Uuid,
        step_id: String,
        task_id: Uuid,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        task_id: Uuid,
        result: Option<serde_json::Value>,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: String,
        task_id: Uuid,
        error: String,
    },

    /// Background failure (detector, cleanup) surfaced for observers
    SystemError {
        source: String,
        message: String,
    },
}

impl OrchestrationEvent {
    /// The topic this event is delivered on
    pub fn topic(&self) -> &'static str {
        match self {
            Self::MilestoneRegistered { .. } => topics::MILESTONE_REGISTERED,
            Self::MilestoneUpdated { .. } => topics::MILESTONE_UPDATED,
            Self::BlockerDetected { .. } => topics::BLOCKER_DETECTED,
            Self::BlockerResolved { .. } => topics::BLOCKER_RESOLVED,
            Self::MetricCalculated { .. } => topics::METRIC_CALCULATED,
            Self::PredictionGenerated { .. } => topics::PREDICTION_GENERATED,
            Self::WorkflowStarted { .. } => topics::WORKFLOW_STARTED,
            Self::WorkflowCompleted { .. } => topics::WORKFLOW_COMPLETED,
            Self::WorkflowFailed { .. } => topics::WORKFLOW_FAILED,
            Self::StepStarted { .. } => topics::STEP_STARTED,
            Self::StepCompleted { .. } => topics::STEP_COMPLETED,
            Self::StepFailed { .. } => topics::STEP_FAILED,
            Self::SystemError { .. } => topics::SYSTEM_ERROR,
        }
    }
}

/// Boxed async subscriber
pub type EventHandler =
    Arc<dyn Fn(OrchestrationEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Topic-keyed in-process publish/subscribe
///
/// # Example
///
/// ```
/// use mergeflow_core::events::{topics, EventBus, OrchestrationEvent};
///
/// # async fn demo() {
/// let bus = EventBus::new();
/// bus.subscribe(topics::SYSTEM_ERROR, |event| async move {
///     eprintln!("observed: {:?}", event);
///     Ok(())
/// });
///
/// bus.publish(OrchestrationEvent::SystemError {
///     source: "cleanup".into(),
///     message: "retention pass failed".into(),
/// })
/// .await;
/// # }
/// ```
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for one topic
    ///
    /// Subscribers are invoked in registration order when an event on the
    /// topic is published.
    pub fn subscribe<F, Fut>(&self, topic: &str, handler: F)
    where
        F: Fn(OrchestrationEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// Deliver an event to every subscriber of its topic, in order
    ///
    /// Subscriber errors are logged and swallowed; a failing observer never
    /// affects engine state.
    pub async fn publish(&self, event: OrchestrationEvent) {
        let topic = event.topic();
        let handlers: Vec<EventHandler> = {
            let subscribers = self.subscribers.read();
            match subscribers.get(topic) {
                Some(handlers) => handlers.clone(),
                None => return,
            }
        };

        for handler in handlers {
            if let Err(error) = handler(event.clone()).await {
                warn!(topic, %error, "event subscriber failed");
            }
        }
    }

    /// Number of subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .get(topic)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.read();
        f.debug_struct("EventBus")
            .field("topics", &subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn system_error(message: &str) -> OrchestrationEvent {
        OrchestrationEvent::SystemError {
            source: "test".to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        bus.subscribe(topics::SYSTEM_ERROR, move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(system_error("one")).await;
        bus.publish(system_error("two")).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(topics::SYSTEM_ERROR, move |_event| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(tag);
                    Ok(())
                }
            });
        }

        bus.publish(system_error("ping")).await;
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe(topics::SYSTEM_ERROR, |_event| async move {
            anyhow::bail!("observer exploded")
        });

        let counter = Arc::clone(&seen);
        bus.subscribe(topics::SYSTEM_ERROR, move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(system_error("boom")).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        bus.subscribe(topics::WORKFLOW_STARTED, move |_event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        // Published on a different topic; subscriber must not fire.
        bus.publish(system_error("other")).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(topics::STEP_STARTED), 0);

        bus.subscribe(topics::STEP_STARTED, |_event| async move { Ok(()) });
        assert_eq!(bus.subscriber_count(topics::STEP_STARTED), 1);
    }
}
