//! Reconciliation status state machine.
//!
//! [`StatusController`] owns every write to a Shoot's status during one
//! reconcile call. It receives the Shoot explicitly, mutates it in place
//! and persists each transition through a [`ShootUpdater`]:
//!
//! ```text
//!   start ──► Processing ──► Succeeded        (flow succeeded)
//!                 │
//!                 ├────────► Error            (failed, retry budget left)
//!                 └────────► Failed           (failed, retry budget spent)
//! ```
//!
//! The retry budget is measured from `retry_cycle_start_time`, which spans
//! consecutive failed attempts and restarts whenever the Shoot's
//! generation changes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::health::labels_marked_unhealthy;
use super::types::{LastError, LastOperation, OperationType, Phase, Shoot};
use super::updater::ShootUpdater;
use crate::config::ShootControllerConfig;
use crate::orchestration::Progress;
use crate::util::{time_elapsed, Clock, SystemClock};
use crate::Result;

const DESCRIPTION_IN_PROGRESS: &str = "Reconciliation of Shoot cluster state in progress.";
const DESCRIPTION_SUCCEEDED: &str = "Shoot cluster state has been successfully reconciled.";
const SUFFIX_WILL_RETRY: &str = " Operation will be retried.";
const SUFFIX_FINAL: &str = " Operation will not be retried.";

/// Progress recorded when an attempt starts.
const INITIAL_PROGRESS: u8 = 1;

pub struct StatusController {
    retry_duration: Duration,
    updater: Arc<dyn ShootUpdater>,
    clock: Arc<dyn Clock>,
}

impl StatusController {
    pub fn new(config: &ShootControllerConfig, updater: Arc<dyn ShootUpdater>) -> Self {
        Self {
            retry_duration: config.retry_duration(),
            updater,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Budget for one retry cycle.
    pub fn retry_duration(&self) -> Duration {
        self.retry_duration
    }

    /// Whether a reconcile should be attempted at all.
    ///
    /// A terminal failure is only retried once a new generation of the
    /// desired spec arrives.
    pub fn needs_reconcile(&self, shoot: &Shoot) -> bool {
        let terminal = shoot.phase().is_some_and(|p| p.is_terminal_failure());
        if terminal && !shoot.generation_changed() {
            debug!(shoot = %shoot.key(), "last operation failed terminally, waiting for spec change");
            return false;
        }
        true
    }

    /// Record the start of a reconcile attempt.
    ///
    /// Opens a new retry cycle if none is active or if the generation
    /// changed since the last attempt.
    pub async fn start(&self, shoot: &mut Shoot, kind: OperationType) -> Result<()> {
        let now = self.clock.now();

        if shoot.status.uid.is_empty() {
            shoot.status.uid = shoot.uid.clone();
        }
        if shoot.status.retry_cycle_start_time.is_none() || shoot.generation_changed() {
            debug!(
                shoot = %shoot.key(),
                generation = shoot.generation,
                observed = shoot.status.observed_generation,
                "starting new retry cycle"
            );
            shoot.status.retry_cycle_start_time = Some(now);
        }
        shoot.status.observed_generation = shoot.generation;
        shoot.status.last_operation = Some(LastOperation {
            kind,
            state: Phase::Processing,
            progress: INITIAL_PROGRESS,
            description: DESCRIPTION_IN_PROGRESS.to_string(),
            last_update_time: now,
        });

        info!(shoot = %shoot.key(), operation = %kind, "reconciliation started");
        self.persist_status(shoot).await
    }

    /// Record flow progress.
    ///
    /// Progress only moves forward; a snapshot lower than the stored value
    /// leaves it unchanged. Ignored unless an operation is processing.
    pub async fn report_progress(&self, shoot: &mut Shoot, progress: &Progress) -> Result<()> {
        let now = self.clock.now();
        let key = shoot.key();
        let Some(op) = shoot.status.last_operation.as_mut() else {
            return Ok(());
        };
        if op.state != Phase::Processing {
            return Ok(());
        }

        op.progress = op.progress.max(progress.percent());
        op.description = format!(
            "Reconciling Shoot cluster state: {} {} ({}/{}).",
            progress.task, progress.state, progress.completed, progress.total
        );
        op.last_update_time = now;

        debug!(shoot = %key, progress = op.progress, task = %progress.task, "progress");
        self.persist_status(shoot).await
    }

    /// Processing → Succeeded. Ends the retry cycle.
    pub async fn succeed(&self, shoot: &mut Shoot, kind: OperationType) -> Result<()> {
        shoot.status.retry_cycle_start_time = None;
        shoot.status.last_error = None;
        shoot.status.last_operation = Some(LastOperation {
            kind,
            state: Phase::Succeeded,
            progress: 100,
            description: DESCRIPTION_SUCCEEDED.to_string(),
            last_update_time: self.clock.now(),
        });

        info!(shoot = %shoot.key(), phase = %Phase::Succeeded, "reconciliation succeeded");
        self.persist_status(shoot).await
    }

    /// Processing → Error or Failed, depending on the retry budget.
    ///
    /// On Failed the retry cycle is closed and the health label is written
    /// with a second, separate update. Returns the phase entered; on a
    /// persistence error the Shoot still carries the computed status.
    pub async fn fail(
        &self,
        shoot: &mut Shoot,
        kind: OperationType,
        last_error: LastError,
    ) -> Result<Phase> {
        let now = self.clock.now();
        let budget_spent = time_elapsed(
            shoot.status.retry_cycle_start_time,
            self.retry_duration,
            now,
        );

        let (phase, description) = if budget_spent {
            shoot.status.retry_cycle_start_time = None;
            (
                Phase::Failed,
                format!("{}{}", last_error.description, SUFFIX_FINAL),
            )
        } else {
            (
                Phase::Error,
                format!("{}{}", last_error.description, SUFFIX_WILL_RETRY),
            )
        };

        let progress = shoot
            .status
            .last_operation
            .as_ref()
            .map(|op| op.progress)
            .unwrap_or(INITIAL_PROGRESS);

        shoot.status.last_error = Some(LastError {
            description: last_error.description,
            last_update_time: Some(now),
        });
        shoot.status.last_operation = Some(LastOperation {
            kind,
            state: phase,
            progress,
            description: description.clone(),
            last_update_time: now,
        });

        error!(shoot = %shoot.key(), phase = %phase, progress, "{}", description);

        let status_result = self.persist_status(shoot).await;
        let label_result = if phase == Phase::Failed {
            self.persist_unhealthy_label(shoot).await
        } else {
            Ok(())
        };

        status_result.and(label_result).map(|()| phase)
    }

    async fn persist_status(&self, shoot: &mut Shoot) -> Result<()> {
        match self.updater.update_shoot_status(shoot).await {
            Ok(updated) => {
                *shoot = updated;
                Ok(())
            }
            Err(e) => {
                warn!(shoot = %shoot.key(), error = %e, "could not persist status");
                Err(e)
            }
        }
    }

    async fn persist_unhealthy_label(&self, shoot: &mut Shoot) -> Result<()> {
        shoot.labels = labels_marked_unhealthy(shoot);
        match self.updater.update_shoot(shoot).await {
            Ok(updated) => {
                *shoot = updated;
                Ok(())
            }
            Err(e) => {
                warn!(shoot = %shoot.key(), error = %e, "could not persist health label");
                Err(e)
            }
        }
    }
}
