//! Persistence seam for Shoot writes.

use async_trait::async_trait;

use super::types::Shoot;
use crate::Result;

/// Writes Shoots back to the API.
///
/// Both calls are expected to be idempotent. Implementations return the
/// stored object so callers can continue from the server's version.
#[async_trait]
pub trait ShootUpdater: Send + Sync {
    /// Persist the status sub-resource.
    async fn update_shoot_status(&self, shoot: &Shoot) -> Result<Shoot>;

    /// Persist metadata (labels, annotations).
    async fn update_shoot(&self, shoot: &Shoot) -> Result<Shoot>;
}
