//! Milestone DAG core
//!
//! Holds the milestone graph for a workflow and answers the structural
//! questions the rest of the system asks:
//!
//! - [`graph::topo_sort`] — DFS with temporary marks; cycles are errors
//! - [`graph::critical_path`] — weighted longest root-to-leaf path using
//!   `expected_completion_time` as node weight
//! - [`graph::workflow_progress`] — weighted progress rollup
//! - [`MilestoneService`] — registration validation and stamped state
//!   transitions over the milestone repository, publishing
//!   `milestone_registered` / `milestone_updated` events

pub mod graph;
mod service;

pub use service::{MilestoneService, MilestoneSnapshot};
