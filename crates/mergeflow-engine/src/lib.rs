//! # Mergeflow engine
//!
//! The core that turns workflow definitions into running work:
//!
//! - [`workflow`] — DAG instantiation, the dispatch loop, the
//!   step-executor registry, and completion reconciliation
//! - [`txn`] — multi-resource transactions with compensating undo
//! - [`dag`] — the milestone graph: topological sort, weighted
//!   longest-path (critical path), and progress rollups
//! - [`blockers`] — dependency-based and time-overrun blocker detection
//! - [`progress`] — metric and prediction registries computed over
//!   milestone snapshots
//!
//! Everything here is storage-agnostic: the engine talks to
//! [`mergeflow_storage::Stores`] and a [`mergeflow_queue::TaskQueue`],
//! and publishes to the [`mergeflow_core::EventBus`].

pub mod blockers;
pub mod dag;
pub mod progress;
pub mod txn;
pub mod workflow;

pub use blockers::BlockerDetector;
pub use dag::{MilestoneService, MilestoneSnapshot};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use txn::{Operation, Transaction, TransactionError, TransactionManager, TransactionStatus};
pub use workflow::{
    ExecutorRegistry, StepContext, StepExecutor, StepOutcome, TaskRunOutcome, WorkflowEngine,
    WorkflowEventHandler,
};
