//! Lifecycle states of one invocation.

use std::fmt;

/// Where an invocation is in its lifecycle.
///
/// Moves strictly forward: `Idle -> Enqueued -> Waiting -> Admitted ->
/// Executing -> Released`. Any state may jump to `Released` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerState {
    Idle,
    Enqueued,
    Waiting,
    Admitted,
    Executing,
    Released,
}

impl SchedulerState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_enter(self, next: SchedulerState) -> bool {
        next == SchedulerState::Released || next > self
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Enqueued => "enqueued",
            SchedulerState::Waiting => "waiting",
            SchedulerState::Admitted => "admitted",
            SchedulerState::Executing => "executing",
            SchedulerState::Released => "released",
        };
        f.write_str(name)
    }
}
