//! RAII lock guard implementation.

use super::operations::release;
use crate::context::ProjectContext;
use crate::error::Result;
use crate::process::OwnerIdentity;
use tracing::warn;

/// RAII guard for the execution lock.
///
/// When dropped, the lock is released if it is still owned by the guard's
/// owner. If release fails, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    ctx: ProjectContext,
    owner: OwnerIdentity,
    released: bool,
}

impl LockGuard {
    pub(super) fn new(ctx: ProjectContext, owner: OwnerIdentity) -> Self {
        Self {
            ctx,
            owner,
            released: false,
        }
    }

    /// Manually release the lock, surfacing any error.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        release(&self.ctx, &self.owner)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = release(&self.ctx, &self.owner)
        {
            warn!(pid = self.owner.pid, error = %e, "failed to release execution lock");
        }
    }
}
