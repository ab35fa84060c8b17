//! Executor for flow graphs.
//!
//! The executor runs every task of a [`Flow`] as its own tokio task as
//! soon as all of its dependencies are terminal, so fan-out is as wide as
//! the graph allows. A single coordinator loop owns the terminal-state
//! table and the progress counter; spawned tasks only report back through
//! their `JoinSet` results.
//!
//! Failure handling:
//! - a task with a retrying policy re-invokes its action after each
//!   failure until success, cancellation or its timeout;
//! - a failed task fails all of its transitive dependents without
//!   invoking them, while independent branches keep running;
//! - cancellation stops new tasks from starting and is passed to running
//!   actions through their token; nothing is aborted forcibly.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::core::dag::Flow;
use crate::core::task::{BoxedAction, FailureReason, RetryPolicy, TaskState};
use crate::orchestration::outcome::{ExecutionOutcome, TaskReport};
use crate::orchestration::progress::{NoopReporter, Progress, ProgressReporter};
use crate::util::sleep_or_cancelled;

/// Runs a [`Flow`] to completion.
///
/// # Example
///
/// ```ignore
/// let outcome = Executor::new(flow)
///     .with_reporter(|p: &Progress| println!("{}% ({})", p.percent(), p.task))
///     .with_cancellation(token.clone())
///     .run()
///     .await;
/// outcome.into_result()?;
/// ```
pub struct Executor {
    flow: Flow,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            reporter: Arc::new(NoopReporter),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn with_shared_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Use `cancel` as the execution's cancellation signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute every task and return the outcome.
    ///
    /// Always returns a fully described outcome: every task ends in exactly
    /// one terminal state, including after cancellation.
    pub async fn run(self) -> ExecutionOutcome {
        let span = info_span!("flow", flow = %self.flow.name(), id = %self.flow.id().short());
        Coordinator::new(self.flow, self.reporter, self.cancel)
            .run()
            .instrument(span)
            .await
    }
}

/// Execute `flow`, reporting progress to `reporter` and observing `cancel`.
pub async fn execute(
    flow: Flow,
    reporter: impl ProgressReporter + 'static,
    cancel: CancellationToken,
) -> ExecutionOutcome {
    Executor::new(flow)
        .with_reporter(reporter)
        .with_cancellation(cancel)
        .run()
        .await
}

type Settled = (NodeIndex, Result<(), FailureReason>);

/// Single owner of all mutable execution state.
struct Coordinator {
    flow: Flow,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    states: Vec<TaskState>,
    /// Dependencies of each task that are not yet terminal.
    unresolved: Vec<usize>,
    ready: VecDeque<NodeIndex>,
    running: JoinSet<Settled>,
    in_flight: usize,
    completed: usize,
    total: usize,
    failure_order: Vec<usize>,
}

impl Coordinator {
    fn new(flow: Flow, reporter: Arc<dyn ProgressReporter>, cancel: CancellationToken) -> Self {
        let count = flow.task_count();
        let unresolved = flow
            .graph()
            .node_indices()
            .map(|i| flow.in_degree(i))
            .collect();
        let total = flow.runnable_count();
        Self {
            flow,
            reporter,
            cancel,
            states: vec![TaskState::Pending; count],
            unresolved,
            ready: VecDeque::new(),
            running: JoinSet::new(),
            in_flight: 0,
            completed: 0,
            total,
            failure_order: Vec::new(),
        }
    }

    async fn run(mut self) -> ExecutionOutcome {
        let started = Instant::now();
        info!(
            tasks = self.flow.task_count(),
            skipped = self.flow.skipped_count(),
            "executing flow"
        );

        self.seed();

        loop {
            if !self.cancel.is_cancelled() {
                while let Some(index) = self.ready.pop_front() {
                    self.spawn(index);
                }
            }

            if self.in_flight == 0 {
                break;
            }

            match self.running.join_next().await {
                Some(Ok((index, result))) => {
                    self.in_flight -= 1;
                    self.settle(index, result);
                }
                Some(Err(join_err)) => {
                    // The wrapper catches panics, so this only happens when the
                    // runtime drops the task; its node is swept up below.
                    self.in_flight -= 1;
                    error!(error = %join_err, "task handle lost");
                }
                None => break,
            }
        }

        self.finish(started)
    }

    /// Settle skipped tasks and queue everything with no dependencies.
    fn seed(&mut self) {
        let indices: Vec<NodeIndex> = self.flow.graph().node_indices().collect();

        for &index in &indices {
            if self.unresolved[index.index()] == 0 && !self.task_skipped(index) {
                self.ready.push_back(index);
            }
        }
        for &index in &indices {
            if self.task_skipped(index) {
                debug!(task = %self.task_name(index), "skipping task, condition is false");
                self.states[index.index()] = TaskState::Skipped;
                self.release_dependents(index);
            }
        }
    }

    fn task_skipped(&self, index: NodeIndex) -> bool {
        self.flow.graph()[index].is_skipped()
    }

    fn task_name(&self, index: NodeIndex) -> &str {
        self.flow.graph()[index].name()
    }

    fn spawn(&mut self, index: NodeIndex) {
        let task = &self.flow.graph()[index];
        let name = task.name().to_string();
        let action = Arc::clone(&task.action);
        let retry = task.retry;
        let cancel = self.cancel.clone();

        debug!(task = %name, "starting task");
        self.in_flight += 1;
        self.running.spawn(
            async move {
                let result = run_with_retry(&name, action, retry, cancel).await;
                (index, result)
            }
            .in_current_span(),
        );
    }

    fn settle(&mut self, index: NodeIndex, result: Result<(), FailureReason>) {
        match result {
            Ok(()) => {
                info!(task = %self.task_name(index), "task succeeded");
                self.states[index.index()] = TaskState::Succeeded;
                self.completed += 1;
                self.report(index);
                self.release_dependents(index);
            }
            Err(reason) => {
                if reason.is_own_failure() {
                    error!(task = %self.task_name(index), error = %reason, "task failed");
                    self.failure_order.push(index.index());
                } else {
                    warn!(task = %self.task_name(index), reason = %reason, "task did not complete");
                }
                // Dependents of a cancelled task are swept up as cancelled
                // in finish(), not blamed on it.
                let cancelled = matches!(reason, FailureReason::Cancelled { .. });
                self.states[index.index()] = TaskState::Failed(reason);
                self.report(index);
                if !cancelled {
                    self.propagate_failure(index);
                }
            }
        }
    }

    /// Mark a dependency of each dependent as terminal and queue those
    /// that have nothing left to wait for.
    fn release_dependents(&mut self, index: NodeIndex) {
        let dependents: Vec<NodeIndex> = self
            .flow
            .graph()
            .neighbors_directed(index, Direction::Outgoing)
            .collect();
        for dependent in dependents {
            let slot = &mut self.unresolved[dependent.index()];
            *slot = slot.saturating_sub(1);
            if *slot == 0 && self.states[dependent.index()] == TaskState::Pending {
                self.ready.push_back(dependent);
            }
        }
    }

    /// Fail every pending transitive dependent of a failed task.
    ///
    /// Skipped tasks are already terminal and stop the walk.
    fn propagate_failure(&mut self, failed: NodeIndex) {
        let origin = self.task_name(failed).to_string();
        let mut stack: Vec<NodeIndex> = self
            .flow
            .graph()
            .neighbors_directed(failed, Direction::Outgoing)
            .collect();

        while let Some(index) = stack.pop() {
            if self.states[index.index()] != TaskState::Pending {
                continue;
            }
            debug!(task = %self.task_name(index), dependency = %origin, "failing dependent");
            self.states[index.index()] = TaskState::Failed(FailureReason::DependencyFailed {
                dependency: origin.clone(),
            });
            self.report(index);
            stack.extend(
                self.flow
                    .graph()
                    .neighbors_directed(index, Direction::Outgoing),
            );
        }
    }

    fn report(&self, index: NodeIndex) {
        let progress = Progress {
            completed: self.completed,
            total: self.total,
            task: self.task_name(index).to_string(),
            state: self.states[index.index()].clone(),
        };
        self.reporter.report(&progress);
    }

    fn finish(mut self, started: Instant) -> ExecutionOutcome {
        let cancelled = self.cancel.is_cancelled();
        let order = toposort(self.flow.graph(), None).unwrap_or_default();
        for index in order {
            if self.states[index.index()] != TaskState::Pending {
                continue;
            }
            let reason = if cancelled {
                FailureReason::Cancelled { last_error: None }
            } else {
                // Only reachable when a task handle was lost: blame the first
                // unsatisfied dependency, or the task itself.
                let blocked_by = self
                    .flow
                    .graph()
                    .neighbors_directed(index, Direction::Incoming)
                    .find(|d| !self.states[d.index()].satisfies_dependents());
                match blocked_by {
                    Some(dep) => FailureReason::DependencyFailed {
                        dependency: self.task_name(dep).to_string(),
                    },
                    None => {
                        self.failure_order.push(index.index());
                        FailureReason::Aborted
                    }
                }
            };
            self.states[index.index()] = TaskState::Failed(reason);
            self.report(index);
        }

        let graph = self.flow.graph();
        let tasks = graph
            .node_indices()
            .map(|i| TaskReport {
                name: graph[i].name().to_string(),
                state: self.states[i.index()].clone(),
            })
            .collect();

        let outcome = ExecutionOutcome {
            flow: self.flow.name().to_string(),
            tasks,
            failure_order: self.failure_order,
            cancelled,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if outcome.is_success() {
            info!(
                succeeded = outcome.succeeded_count(),
                skipped = outcome.skipped_count(),
                elapsed_ms,
                "flow succeeded"
            );
        } else {
            warn!(
                failed = outcome.failed_count(),
                cancelled,
                elapsed_ms,
                "flow failed"
            );
        }
        outcome
    }
}

/// Invoke `action` according to `retry`.
///
/// Attempts are strictly sequential. Cancellation is observed between
/// attempts; a running attempt is never interrupted.
async fn run_with_retry(
    name: &str,
    action: BoxedAction,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> Result<(), FailureReason> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        // Calling inside the async block keeps panics in the synchronous
        // part of the action within catch_unwind.
        let attempt = async { action(cancel.clone()).await };
        let message = match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{:#}", err),
            Err(payload) => {
                return Err(FailureReason::Panicked {
                    message: panic_message(payload),
                })
            }
        };

        if !retry.is_retrying() {
            return Err(FailureReason::Error { message, attempts });
        }
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled {
                last_error: Some(message),
            });
        }
        if let Some(timeout) = retry.timeout {
            if started.elapsed() + retry.interval > timeout {
                return Err(FailureReason::TimedOut {
                    message,
                    attempts,
                    timeout,
                });
            }
        }

        warn!(
            task = %name,
            attempt = attempts,
            error = %message,
            retry_in_ms = retry.interval.as_millis() as u64,
            "task failed, retrying"
        );

        if sleep_or_cancelled(retry.interval, &cancel).await {
            return Err(FailureReason::Cancelled {
                last_error: Some(message),
            });
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
