//! Execution outcome and aggregate error reporting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::{FailureReason, TaskState};

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub name: String,
    #[serde(flatten)]
    pub state: TaskState,
}

/// Aggregate failure of a flow.
///
/// Lists every task whose own action failed, in settlement order. Tasks
/// failed by propagation are implied by their failed ancestor and left
/// out; tasks that never ran because of cancellation are summarised as a
/// count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    pub flow: String,
    /// `(task, description)` pairs of independently failed branches.
    pub failures: Vec<(String, String)>,
    /// Tasks that settled as cancelled.
    pub cancelled: usize,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Flow '{}' failed: ", self.flow)?;
        let mut parts: Vec<String> = self
            .failures
            .iter()
            .map(|(task, err)| format!("task '{}' failed: {}", task, err))
            .collect();
        if self.cancelled > 0 {
            parts.push(format!(
                "execution cancelled with {} task(s) unfinished",
                self.cancelled
            ));
        }
        if parts.is_empty() {
            parts.push("unknown error".to_string());
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// Result of executing a flow: every task's terminal state plus the
/// aggregate verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub flow: String,
    /// One report per task, in registration order.
    pub tasks: Vec<TaskReport>,
    /// Own failures in the order they settled.
    #[serde(skip)]
    pub(crate) failure_order: Vec<usize>,
    /// Whether the caller cancelled the execution.
    pub cancelled: bool,
}

impl ExecutionOutcome {
    /// Succeeded iff every non-skipped task succeeded.
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.state.satisfies_dependents())
    }

    /// State of the named task.
    pub fn state_of(&self, name: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.name == name).map(|t| &t.state)
    }

    pub fn succeeded_count(&self) -> usize {
        self.count(|s| matches!(s, TaskState::Succeeded))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, TaskState::Skipped))
    }

    pub fn failed_count(&self) -> usize {
        self.count(TaskState::is_failed)
    }

    fn count(&self, pred: impl Fn(&TaskState) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(&t.state)).count()
    }

    /// The aggregate error, or `None` on success.
    pub fn error(&self) -> Option<FlowError> {
        if self.is_success() {
            return None;
        }

        let mut failures = Vec::new();
        for &i in &self.failure_order {
            if let Some(TaskReport {
                name,
                state: TaskState::Failed(reason),
            }) = self.tasks.get(i)
            {
                failures.push((name.clone(), reason.to_string()));
            }
        }
        // Own failures that were not recorded in order (e.g. deserialized outcomes)
        for (i, report) in self.tasks.iter().enumerate() {
            if let TaskState::Failed(reason) = &report.state {
                if reason.is_own_failure() && !self.failure_order.contains(&i) {
                    failures.push((report.name.clone(), reason.to_string()));
                }
            }
        }

        let cancelled = self.count(|s| {
            matches!(s, TaskState::Failed(FailureReason::Cancelled { .. }))
        });

        Some(FlowError {
            flow: self.flow.clone(),
            failures,
            cancelled,
        })
    }

    /// Human-readable failure description, or `None` on success.
    pub fn description(&self) -> Option<String> {
        self.error().map(|e| e.to_string())
    }

    pub fn into_result(self) -> Result<(), FlowError> {
        match self.error() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
