//! Shoot resource model and reconciliation status tracking.

mod health;
mod status;
mod types;
mod updater;

pub use health::{
    labels_marked_unhealthy, wants_seed_registration, SHOOT_STATUS_LABEL,
    SHOOT_STATUS_UNHEALTHY, SHOOT_USE_AS_SEED_ANNOTATION,
};
pub use status::StatusController;
pub use types::{LastError, LastOperation, OperationType, Phase, Shoot, ShootStatus};
pub use updater::ShootUpdater;
