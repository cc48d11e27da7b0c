//! Exit-path finalizer.
//!
//! Created before the first shared-state mutation of an invocation and run
//! exactly once, either explicitly or from `Drop`. Every exit path (normal
//! return, error, trapped signal, panic unwinding) therefore leaves the
//! queue, the lock, the dependency edge and the execution record clean.

use super::execute::ExecutionRecord;
use crate::context::ProjectContext;
use crate::deadline;
use crate::deadlock;
use crate::fs::{read_json, remove_if_exists, with_section};
use crate::lock::LockGuard;
use crate::process::OwnerIdentity;
use crate::queue;
use tracing::{debug, warn};

pub(crate) struct ExitCleanup {
    ctx: ProjectContext,
    owner: OwnerIdentity,
    lock: Option<LockGuard>,
    done: bool,
}

impl ExitCleanup {
    pub(crate) fn new(ctx: ProjectContext, owner: OwnerIdentity) -> Self {
        Self {
            ctx,
            owner,
            lock: None,
            done: false,
        }
    }

    /// Take ownership of the lock guard so it is released with everything
    /// else.
    pub(crate) fn hold(&mut self, guard: LockGuard) {
        self.lock = Some(guard);
    }

    /// Run the cleanup now. Later calls do nothing.
    pub(crate) fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let pid = self.owner.pid;

        if let Err(e) = deadlock::clear_edge(&self.ctx, pid) {
            warn!(error = %e, "failed to clear dependency edge");
        }

        if let Ok(Some(record)) = read_json::<_, ExecutionRecord>(self.ctx.owner_path())
            && record.pid == pid
            && let Err(e) = remove_if_exists(self.ctx.owner_path())
        {
            warn!(error = %e, "failed to remove execution record");
        }

        if let Some(guard) = self.lock.take()
            && let Err(e) = guard.release()
        {
            warn!(error = %e, "failed to release execution lock");
        }

        let drained = with_section(&self.ctx.state_lock_path(), || {
            queue::dequeue_locked(&self.ctx, pid)?;
            deadline::finish_if_idle_locked(&self.ctx)
        });
        match drained {
            Ok(true) => debug!(pid, "pipeline finished"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to leave the admission queue"),
        }
    }
}

impl Drop for ExitCleanup {
    fn drop(&mut self) {
        self.finish();
    }
}
