//! Task data model for flow graphs.
//!
//! Tasks are the atomic units of a flow: a named, fallible action with a
//! retry policy and a build-time gate. Each task settles in exactly one
//! terminal [`TaskState`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result returned by a task action.
///
/// Tests and callers can write `ActionResult::Ok(())` inside async blocks
/// to pin the error type without a turbofish.
pub type ActionResult = anyhow::Result<()>;

/// A boxed, type-erased action future.
pub type ActionFuture = BoxFuture<'static, ActionResult>;

/// A shareable action: invoked once per attempt with the flow's
/// cancellation token.
pub(crate) type BoxedAction = Arc<dyn Fn(CancellationToken) -> ActionFuture + Send + Sync>;

pub(crate) fn boxed_action<F, Fut>(action: F) -> BoxedAction
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |cancel: CancellationToken| -> ActionFuture { Box::pin(action(cancel)) })
}

/// Unique identifier for a flow graph.
///
/// Every [`TaskHandle`] carries the id of the flow that issued it, which
/// keeps handles from leaking across graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub Uuid);

impl FlowId {
    /// Create a new unique flow identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a task registered in a flow.
///
/// Only the flow builder that created a handle accepts it as a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub(crate) flow: FlowId,
    pub(crate) index: NodeIndex,
}

impl TaskHandle {
    /// The flow this handle belongs to.
    pub fn flow_id(&self) -> FlowId {
        self.flow
    }
}

/// Per-task retry behaviour.
///
/// A zero interval runs the action exactly once. A nonzero interval
/// re-invokes the action after each failure, waiting `interval` between
/// attempts, until it succeeds, the flow is cancelled, or the optional
/// `timeout` has elapsed since the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait between attempts. Zero disables retrying.
    pub interval: Duration,
    /// Upper bound on the whole retry loop.
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Run once, no retry.
    pub const fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: None,
        }
    }

    /// Retry every `interval` until success or cancellation.
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    /// Bound the retry loop by `timeout`.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_retrying(&self) -> bool {
        !self.interval.is_zero()
    }
}

impl From<Duration> for RetryPolicy {
    fn from(interval: Duration) -> Self {
        Self::every(interval)
    }
}

/// Why a task ended in [`TaskState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FailureReason {
    /// The action returned an error and was not (or no longer) retried.
    Error {
        /// Rendered error chain of the last attempt.
        message: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// The retry loop ran past the policy's timeout.
    TimedOut {
        message: String,
        attempts: u32,
        timeout: Duration,
    },
    /// A dependency failed, so the action was never invoked.
    DependencyFailed {
        /// Name of the failed task this failure came from.
        dependency: String,
    },
    /// The flow was cancelled before this task could settle.
    Cancelled {
        /// Error of the attempt interrupted by the cancellation, if any.
        last_error: Option<String>,
    },
    /// The action panicked.
    Panicked { message: String },
    /// The task's runtime handle was lost before it reported back.
    Aborted,
}

impl FailureReason {
    /// Whether this failure originated in the task itself rather than
    /// upstream or from the caller.
    pub fn is_own_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::Error { .. }
                | FailureReason::TimedOut { .. }
                | FailureReason::Panicked { .. }
                | FailureReason::Aborted
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Error { message, .. } => write!(f, "{}", message),
            FailureReason::TimedOut {
                message, timeout, ..
            } => write!(f, "retry timeout of {:?} exceeded: {}", timeout, message),
            FailureReason::DependencyFailed { dependency } => {
                write!(f, "dependency '{}' failed", dependency)
            }
            FailureReason::Cancelled { last_error: None } => write!(f, "cancelled"),
            FailureReason::Cancelled {
                last_error: Some(err),
            } => write!(f, "cancelled after error: {}", err),
            FailureReason::Panicked { message } => write!(f, "panicked: {}", message),
            FailureReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// State of a task within one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    /// Not yet settled.
    #[default]
    Pending,
    /// The action completed successfully.
    Succeeded,
    /// The task's condition was false at build time; never executed.
    Skipped,
    /// The task failed, directly or by propagation.
    Failed(FailureReason),
}

impl TaskState {
    /// Succeeded, Skipped and Failed are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }

    /// Whether dependents may treat this state as satisfied.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskState::Failed(_))
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Skipped => write!(f, "skipped"),
            TaskState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A single task in a flow graph.
pub struct Task {
    pub(crate) name: String,
    pub(crate) action: BoxedAction,
    pub(crate) retry: RetryPolicy,
    pub(crate) condition: bool,
}

impl Task {
    pub(crate) fn new(name: &str, action: BoxedAction, retry: RetryPolicy, condition: bool) -> Self {
        Self {
            name: name.to_string(),
            action,
            retry,
            condition,
        }
    }

    /// Human-readable name, used in diagnostics and progress text.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether the task was gated off at build time.
    pub fn is_skipped(&self) -> bool {
        !self.condition
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("condition", &self.condition)
            .finish()
    }
}
