//! Orchestrator configuration surface

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serde_util::{duration_millis, option_duration_millis};

/// Recognized orchestrator options and their defaults
///
/// The queue visibility timeout is a constant of the system (leases are
/// short and fixed), so it is exposed read-only rather than as a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Parallel task-processor loops
    pub max_concurrent_tasks: usize,

    /// Hard bound around a single task execution
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Queue retry budget before a task is dead-lettered
    pub retry_attempts: u32,

    /// Whether milestone updates are pushed to observers as they happen
    pub real_time_updates: bool,

    /// Cadence for the metric pass and the reactive blocker detector
    #[serde(with = "duration_millis")]
    pub metric_calculation_interval: Duration,

    pub enable_predictive_analytics: bool,
    pub enable_blocker_detection: bool,

    /// Per-operation transaction timeout; `None` = unbounded
    #[serde(default, with = "option_duration_millis")]
    pub transaction_timeout: Option<Duration>,

    /// Strict transaction mode (reserved; kept for configuration parity)
    pub strict_transactions: bool,

    /// Cleanup scheduler cadence
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,

    /// Health-check scheduler cadence
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,

    /// Stale-lease recovery cadence
    #[serde(with = "duration_millis")]
    pub queue_recovery_interval: Duration,

    /// Worker loop sleep after each dispatch
    #[serde(with = "duration_millis")]
    pub worker_idle_sleep: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            task_timeout: Duration::from_secs(600),
            retry_attempts: 3,
            real_time_updates: true,
            metric_calculation_interval: Duration::from_secs(5),
            enable_predictive_analytics: true,
            enable_blocker_detection: true,
            transaction_timeout: None,
            strict_transactions: false,
            cleanup_interval: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(300),
            queue_recovery_interval: Duration::from_secs(600),
            worker_idle_sleep: Duration::from_secs(1),
        }
    }
}

impl OrchestratorConfig {
    /// Fixed queue lease TTL (5 minutes); see the queue crate
    pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_metric_calculation_interval(mut self, interval: Duration) -> Self {
        self.metric_calculation_interval = interval;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn with_worker_idle_sleep(mut self, sleep: Duration) -> Self {
        self.worker_idle_sleep = sleep;
        self
    }

    pub fn without_blocker_detection(mut self) -> Self {
        self.enable_blocker_detection = false;
        self
    }

    pub fn without_predictive_analytics(mut self) -> Self {
        self.enable_predictive_analytics = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.task_timeout, Duration::from_secs(600));
        assert_eq!(config.retry_attempts, 3);
        assert!(config.real_time_updates);
        assert_eq!(config.metric_calculation_interval, Duration::from_secs(5));
        assert!(config.enable_predictive_analytics);
        assert!(config.enable_blocker_detection);
        assert_eq!(config.transaction_timeout, None);
        assert_eq!(
            OrchestratorConfig::VISIBILITY_TIMEOUT,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_builders() {
        let config = OrchestratorConfig::new()
            .with_max_concurrent_tasks(2)
            .with_retry_attempts(5)
            .with_transaction_timeout(Duration::from_secs(30))
            .without_blocker_detection();

        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.transaction_timeout, Some(Duration::from_secs(30)));
        assert!(!config.enable_blocker_detection);
    }

    #[test]
    fn test_max_concurrent_tasks_floor() {
        let config = OrchestratorConfig::new().with_max_concurrent_tasks(0);
        assert_eq!(config.max_concurrent_tasks, 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = OrchestratorConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["task_timeout"], 600_000);

        let parsed: OrchestratorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.task_timeout, config.task_timeout);
    }
}
