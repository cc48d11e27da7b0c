//! Project-wide execution lock.
//!
//! Exactly one process per project may hold the lock, and only the holder
//! runs its command. The lock is a single file, `lock.json`, in the project's
//! state directory.
//!
//! # Acquisition
//!
//! The record is first written to a private temporary file and then
//! hard-linked to `lock.json`. `link(2)` fails when the target exists, so
//! creation is atomic create-if-absent and the record is never observed
//! half-written.
//!
//! # Staleness
//!
//! A record whose owner is no longer live (dead PID, zombie, or a reused PID
//! with a different start time) is stale. Any waiter may reclaim it, but
//! only after re-reading it under the state section lock, so a waiter never
//! deletes a record another live process has just created.
//!
//! # RAII Guards
//!
//! Holders keep a [`LockGuard`] that releases on drop. Release is
//! owner-checked and idempotent.

mod guard;
mod operations;
mod record;


// Re-export public API
pub use guard::LockGuard;
pub use operations::{
    AcquireOptions, TryAcquire, acquire, current_holder, force_clear, release, try_acquire,
};
pub use record::{LockRecord, format_age};
pub(crate) use record::get_owner_string;
