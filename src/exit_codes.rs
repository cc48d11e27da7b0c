//! Exit code constants for onelane.
//!
//! A supervised command's own exit status is passed through untouched, so the
//! scheduler's own outcomes live in a band ordinary tools rarely use:
//! - 0: Success
//! - 2: User error (bad args, invalid config, unreadable state)
//! - 122: Pipeline deadline exceeded (the whole chain was terminated)
//! - 123: Deadlock detected (this waiter aborted itself)
//! - 124: Lock acquisition timed out
//!
//! A supervised command killed by signal `N` exits with `128 + N`, the same
//! convention shells use.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, or unusable state directory.
pub const USER_ERROR: i32 = 2;

/// The pipeline deadline expired; every participant was terminated.
pub const PIPELINE_DEADLINE: i32 = 122;

/// A dependency cycle was detected and this waiter aborted.
pub const DEADLOCK: i32 = 123;

/// The execution lock could not be acquired within the configured timeout.
pub const LOCK_TIMEOUT: i32 = 124;

/// Offset added to a signal number when a process dies from that signal.
pub const SIGNAL_BASE: i32 = 128;

/// Exit code for a process terminated by `signal`.
pub fn from_signal(signal: i32) -> i32 {
    SIGNAL_BASE + signal
}
