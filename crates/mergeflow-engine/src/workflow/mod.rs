//! Workflow engine
//!
//! Translates a [`WorkflowDefinition`] into tasks, dispatches runnable
//! tasks through the queue, invokes step executors, and reconciles
//! outcomes:
//!
//! - [`StepExecutor`] / [`ExecutorRegistry`] — one executor per step
//!   type; the engine promises at most one concurrent call per task
//! - [`WorkflowEventHandler`] — ordered observers with optional hooks,
//!   invoked synchronously; their failures are logged, never propagated
//! - [`WorkflowEngine`] — start, dispatch, execute, reconcile, cancel
//!
//! [`WorkflowDefinition`]: mergeflow_core::WorkflowDefinition

mod engine;
mod executor;
mod handlers;

pub use engine::{TaskRunOutcome, WorkflowEngine};
pub use executor::{ExecutorRegistry, StepContext, StepExecutor, StepOutcome};
pub use handlers::{HandlerRegistry, WorkflowEventHandler};
