//! Progress reporting for running flows.

use tokio::sync::watch;

use crate::core::task::TaskState;

/// Snapshot emitted each time a task settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Succeeded non-skipped tasks so far.
    pub completed: usize,
    /// Non-skipped tasks in the flow.
    pub total: usize,
    /// Name of the task that just settled.
    pub task: String,
    /// The state it settled in.
    pub state: TaskState,
}

impl Progress {
    /// Completion percentage in `0..=100`. A flow with nothing to run is
    /// complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}

/// Receives a [`Progress`] snapshot after every settled task.
///
/// Called synchronously from the executor's coordinator, so
/// implementations must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _progress: &Progress) {}
}

/// Latest-wins progress channel.
///
/// The executor publishes into the sender half without ever waiting; a
/// consumer on the receiver half persists snapshots at its own pace and
/// only ever sees the newest one.
pub struct ProgressChannel {
    tx: watch::Sender<Option<Progress>>,
}

impl ProgressChannel {
    pub fn new() -> (Self, watch::Receiver<Option<Progress>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ProgressChannel {
    fn report(&self, progress: &Progress) {
        // send_replace never fails, even without receivers
        self.tx.send_replace(Some(progress.clone()));
    }
}
