//! # Mergeflow orchestrator
//!
//! Owns lifecycle and glue: wires the engine, queue, and stores
//! together, runs the background schedulers (worker pool, cleanup,
//! health check, queue recovery, blocker detection + metrics), and
//! exposes the PR-event entry point that turns an external pull-request
//! event into a running `pr_analysis` workflow.
//!
//! ```ignore
//! use mergeflow_core::OrchestratorConfig;
//! use mergeflow_orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::in_memory(OrchestratorConfig::default());
//! orchestrator.initialize().await?;
//!
//! let output = orchestrator
//!     .process_pr_event("acme/widgets", 42, &pr_data)
//!     .await?;
//!
//! orchestrator.shutdown().await?;
//! ```

mod default_workflow;
mod executors;
mod orchestrator;

pub use default_workflow::{pr_analysis_workflow, PR_ANALYSIS_WORKFLOW};
pub use executors::{
    AnalysisExecutor, CodegenExecutor, NotificationExecutor, ValidationExecutor,
};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorStatus};
