//! # Mergeflow core
//!
//! Shared domain model for the mergeflow orchestration workspace.
//!
//! This crate holds everything the other crates agree on:
//!
//! - **Entities**: workflow definitions and executions, tasks, milestones,
//!   blockers, and the pull-request integration types ([`model`])
//! - **Errors**: the [`OrchestrationError`] kinds surfaced to callers
//! - **Events**: the in-process [`EventBus`] and [`OrchestrationEvent`]
//!   payloads that decouple the engine from its observers
//! - **Configuration**: [`OrchestratorConfig`] with recognized options and
//!   their defaults
//!
//! The crate is deliberately storage- and runtime-agnostic: nothing here
//! touches a database or spawns a task.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod serde_util;

pub use config::OrchestratorConfig;
pub use error::{OrchestrationError, Result};
pub use events::{topics, EventBus, OrchestrationEvent};
pub use model::{
    AnalysisStatus, Blocker, BlockerSeverity, CodegenTaskSummary, Correlation, DatabaseSummary,
    Milestone, MilestoneState, MilestoneStatus, ModuleOutput, NewTask, PrEventData, PrStatus,
    Project, PullRequest, StepType, Task, TaskPriority, TaskStatus, WorkflowDefinition,
    WorkflowExecution, WorkflowExecutionStatus, WorkflowStep, WorkflowTrigger,
};
