//! One reconcile attempt for one Shoot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::flow::reconcile_flow;
use super::step::{Botanist, ReconcileContext, Step};
use crate::config::ShootControllerConfig;
use crate::core::Flow;
use crate::orchestration::{ExecutionOutcome, Executor, Progress, ProgressChannel};
use crate::shoot::{
    wants_seed_registration, LastError, OperationType, Phase, Shoot, ShootUpdater,
    StatusController,
};
use crate::util::Clock;
use crate::Result;

const FLOW_FAILURE_PREFIX: &str = "Failed to reconcile Shoot cluster state";

/// What a reconcile attempt left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Phase of the Shoot's last operation after the attempt.
    pub phase: Phase,
    /// When the caller should try again; `None` means only on the next
    /// spec change or periodic sync.
    pub requeue_after: Option<Duration>,
}

/// Which operation a reconcile of `shoot` records.
///
/// A Shoot stays in `Create` until its first successful creation.
pub fn operation_type(shoot: &Shoot) -> OperationType {
    match &shoot.status.last_operation {
        None => OperationType::Create,
        Some(op) if op.kind == OperationType::Create && op.state != Phase::Succeeded => {
            OperationType::Create
        }
        Some(_) => OperationType::Reconcile,
    }
}

/// Drives the reconcile flow and records its result on the Shoot.
pub struct ShootReconciler {
    status: StatusController,
    botanist: Arc<dyn Botanist>,
    default_retry: Duration,
    sync_period: Duration,
    cancel: CancellationToken,
}

impl ShootReconciler {
    pub fn new(
        config: &ShootControllerConfig,
        updater: Arc<dyn ShootUpdater>,
        botanist: Arc<dyn Botanist>,
    ) -> Self {
        Self {
            status: StatusController::new(config, updater),
            botanist,
            default_retry: config.default_retry_interval(),
            sync_period: config.sync_period(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.status = self.status.with_clock(clock);
        self
    }

    /// Cancelling `cancel` stops running flows; the attempt then ends in
    /// the Error phase.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status_controller(&self) -> &StatusController {
        &self.status
    }

    /// Run one reconcile attempt.
    ///
    /// Flow failures are recorded on the Shoot and reported through the
    /// returned phase. An `Err` means a status write failed, in which case
    /// the Shoot still carries the status that could not be persisted, or
    /// that the flow wiring is invalid.
    pub async fn reconcile(
        &self,
        shoot: &mut Shoot,
        ctx: ReconcileContext,
    ) -> Result<ReconcileResult> {
        let span = info_span!("reconcile", shoot = %shoot.key(), generation = shoot.generation);
        self.reconcile_inner(shoot, ctx).instrument(span).await
    }

    async fn reconcile_inner(
        &self,
        shoot: &mut Shoot,
        ctx: ReconcileContext,
    ) -> Result<ReconcileResult> {
        if !self.status.needs_reconcile(shoot) {
            return Ok(ReconcileResult {
                phase: Phase::Failed,
                requeue_after: None,
            });
        }

        let kind = operation_type(shoot);
        self.status.start(shoot, kind).await?;

        let flow = reconcile_flow(Arc::clone(&self.botanist), ctx, self.default_retry)?;
        let outcome = self.execute(flow, shoot).await;

        match outcome.into_result() {
            Ok(()) => {
                self.sync_seed_registration(shoot).await;
                self.status.succeed(shoot, kind).await?;
                info!("Successfully reconciled Shoot cluster state");
                Ok(ReconcileResult {
                    phase: Phase::Succeeded,
                    requeue_after: None,
                })
            }
            Err(flow_error) => {
                let last_error =
                    LastError::new(format!("{}: {}", FLOW_FAILURE_PREFIX, flow_error));
                self.record_failure(shoot, kind, last_error).await
            }
        }
    }

    /// Execute `flow`, persisting progress while it runs.
    ///
    /// Status writes run beside the flow, never in front of it. The
    /// persister drains the last snapshot and stops once the executor drops
    /// its end of the channel.
    async fn execute(&self, flow: Flow, shoot: &mut Shoot) -> ExecutionOutcome {
        let (channel, progress) = ProgressChannel::new();
        let run = Executor::new(flow)
            .with_reporter(channel)
            .with_cancellation(self.cancel.child_token())
            .run();

        let (outcome, ()) = tokio::join!(run, self.persist_progress_loop(shoot, progress));
        outcome
    }

    async fn persist_progress_loop(
        &self,
        shoot: &mut Shoot,
        mut progress: watch::Receiver<Option<Progress>>,
    ) {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                self.persist_progress(shoot, &snapshot).await;
            }
        }
    }

    async fn persist_progress(&self, shoot: &mut Shoot, snapshot: &Progress) {
        if let Err(e) = self.status.report_progress(shoot, snapshot).await {
            warn!(error = %e, task = %snapshot.task, "could not persist progress");
        }
    }

    async fn record_failure(
        &self,
        shoot: &mut Shoot,
        kind: OperationType,
        last_error: LastError,
    ) -> Result<ReconcileResult> {
        let phase = self.status.fail(shoot, kind, last_error).await?;
        Ok(ReconcileResult {
            phase,
            requeue_after: (phase == Phase::Error).then_some(self.sync_period),
        })
    }

    /// Register or unregister the Shoot as a Seed per its annotation.
    /// Failures are logged and do not fail the reconcile.
    async fn sync_seed_registration(&self, shoot: &Shoot) {
        let step = if wants_seed_registration(shoot) {
            Step::RegisterAsSeed
        } else {
            Step::UnregisterAsSeed
        };
        if let Err(e) = self.botanist.run(step, self.cancel.child_token()).await {
            let message = format!("{:#}", e);
            error!(step = %step, error = %message, "Could not update Seed registration");
        }
    }
}
