//! Lock acquisition, release, and reclamation.
//!
//! None of these functions may be called while the caller already holds the
//! state section lock: reclamation and release take it themselves.

use super::guard::LockGuard;
use super::record::LockRecord;
use crate::context::ProjectContext;
use crate::error::{Result, SchedError};
use crate::fs::{remove_if_exists, with_section, write_json};
use crate::process::OwnerIdentity;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Attempts made without sleeping when the lock vanishes or is reclaimed
/// between two steps of a single acquisition attempt.
const IMMEDIATE_RETRIES: usize = 8;

/// Bounds for [`acquire`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    /// Give up after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Delay between attempts while a live owner holds the lock.
    pub poll_interval: Duration,
}

/// Result of a single non-blocking acquisition attempt.
#[derive(Debug)]
pub enum TryAcquire {
    /// The caller now owns the lock.
    Acquired(LockGuard),
    /// A live process holds the lock.
    Held(LockRecord),
}

/// Try once to take the lock for `record.owner`.
///
/// Stale records found along the way are reclaimed and the attempt is
/// repeated immediately, so `Held` always names a live owner.
pub fn try_acquire(ctx: &ProjectContext, record: &LockRecord) -> Result<TryAcquire> {
    ctx.ensure_state_dir()?;
    let lock_path = ctx.lock_path();
    let staging = ctx
        .state_dir
        .join(format!(".lock.{}.staging", record.owner.pid));

    for _ in 0..IMMEDIATE_RETRIES {
        write_json(&staging, record)?;
        let linked = std::fs::hard_link(&staging, &lock_path);
        remove_if_exists(&staging)?;

        match linked {
            Ok(()) => {
                debug!(pid = record.owner.pid, "acquired execution lock");
                return Ok(TryAcquire::Acquired(LockGuard::new(
                    ctx.clone(),
                    record.owner,
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(SchedError::Lock(format!(
                    "failed to create '{}': {}",
                    lock_path.display(),
                    e
                )));
            }
        }

        match LockRecord::from_file(&lock_path) {
            Ok(Some(holder)) if !holder.is_stale() => return Ok(TryAcquire::Held(holder)),
            Ok(Some(holder)) => {
                if reclaim_stale(ctx, Some(&holder))? {
                    warn!(
                        stale_pid = holder.pid(),
                        command = %holder.command,
                        age = %holder.age_string(),
                        "reclaimed stale execution lock"
                    );
                }
            }
            // Released between our link attempt and the read.
            Ok(None) => {}
            Err(e) => {
                if reclaim_stale(ctx, None)? {
                    warn!(error = %e, "removed unreadable execution lock");
                }
            }
        }
    }

    // Persistent churn: report whoever holds it now, or keep trying later.
    match LockRecord::from_file(&lock_path)? {
        Some(holder) => Ok(TryAcquire::Held(holder)),
        None => Err(SchedError::Lock(
            "execution lock kept changing hands during acquisition".to_string(),
        )),
    }
}

/// Wait for the lock.
///
/// Polls every `options.poll_interval` while a live owner holds it. Before
/// each sleep, `on_wait` is called with the current holder; an error from it
/// aborts the wait (deadlock, deadline expiry, interruption). Contention alone
/// never fails acquisition; only `options.timeout` does.
pub fn acquire<F>(
    ctx: &ProjectContext,
    record: &LockRecord,
    options: AcquireOptions,
    mut on_wait: F,
) -> Result<LockGuard>
where
    F: FnMut(&LockRecord) -> Result<()>,
{
    let start = Instant::now();

    loop {
        let holder = match try_acquire(ctx, record) {
            Ok(TryAcquire::Acquired(guard)) => return Ok(guard),
            Ok(TryAcquire::Held(holder)) => Some(holder),
            Err(SchedError::Lock(message)) => {
                debug!(%message, "lock acquisition attempt inconclusive");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(holder) = &holder {
            on_wait(holder)?;
        }

        let waited = start.elapsed();
        let nap = match options.timeout {
            Some(timeout) if waited >= timeout => {
                return Err(SchedError::ContentionTimeout { waited });
            }
            Some(timeout) => options.poll_interval.min(timeout - waited),
            None => options.poll_interval,
        };
        thread::sleep(nap);
    }
}

/// Release the lock if `owner` holds it.
///
/// Idempotent: returns `Ok(false)` when the lock is absent or held by someone
/// else (for example a later holder after a cleanup race).
pub fn release(ctx: &ProjectContext, owner: &OwnerIdentity) -> Result<bool> {
    let lock_path = ctx.lock_path();
    if !lock_path.exists() {
        return Ok(false);
    }

    with_section(&ctx.state_lock_path(), || {
        match LockRecord::from_file(&lock_path) {
            Ok(Some(current)) if current.owner == *owner => {
                let removed = remove_if_exists(&lock_path)?;
                if removed {
                    debug!(pid = owner.pid, "released execution lock");
                }
                Ok(removed)
            }
            _ => Ok(false),
        }
    })
}

/// Current holder of the lock, whether live or stale.
pub fn current_holder(ctx: &ProjectContext) -> Result<Option<LockRecord>> {
    LockRecord::from_file(ctx.lock_path())
}

/// Remove the lock regardless of owner, returning what was removed.
///
/// Used by the pipeline watchdog and the `clear` command; callers are
/// responsible for deciding that this is appropriate.
pub fn force_clear(ctx: &ProjectContext) -> Result<Option<LockRecord>> {
    let lock_path = ctx.lock_path();
    with_section(&ctx.state_lock_path(), || {
        let previous = LockRecord::from_file(&lock_path).ok().flatten();
        remove_if_exists(&lock_path)?;
        Ok(previous)
    })
}

/// Remove the lock file if it still holds the stale record we observed.
///
/// `observed = None` means the record could not be parsed; it is removed only
/// if it is still unparseable. Returns whether the lock is now free.
fn reclaim_stale(ctx: &ProjectContext, observed: Option<&LockRecord>) -> Result<bool> {
    let lock_path = ctx.lock_path();
    with_section(&ctx.state_lock_path(), || {
        let current = LockRecord::from_file(&lock_path);
        let reclaim = match (current, observed) {
            (Ok(None), _) => return Ok(true),
            (Ok(Some(current)), Some(observed)) => {
                current.owner == observed.owner && current.is_stale()
            }
            (Err(_), None) => true,
            _ => false,
        };

        if reclaim {
            remove_if_exists(&lock_path)?;
        }
        Ok(reclaim)
    })
}
