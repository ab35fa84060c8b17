//! Flow execution.
//!
//! The executor drives a built [`Flow`](crate::core::Flow) to completion,
//! streaming [`Progress`] as tasks settle and aggregating failures into an
//! [`ExecutionOutcome`].

mod executor;
mod outcome;
mod progress;

pub use executor::{execute, Executor};
pub use outcome::{ExecutionOutcome, FlowError, TaskReport};
pub use progress::{NoopReporter, Progress, ProgressChannel, ProgressReporter};
