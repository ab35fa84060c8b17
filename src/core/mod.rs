//! Core flow model.
//!
//! Tasks, their handles and retry policies, and the builder that
//! assembles them into a validated dependency graph.

pub mod dag;
pub mod task;

pub use dag::{Flow, FlowBuilder};
pub use task::{
    ActionFuture, ActionResult, FailureReason, FlowId, RetryPolicy, Task, TaskHandle, TaskState,
};
