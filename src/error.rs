//! Error types for onelane.
//!
//! Uses thiserror for derive macros. Only terminal conditions are errors:
//! stale lock reclamation, orphan reaping and per-process memory kills are
//! recovered where they happen and only logged.

use crate::exit_codes;
use std::time::Duration;
use thiserror::Error;

/// Main error type for scheduler operations.
///
/// Each variant maps to a distinguished exit code so calling automation can
/// tell "my command failed" apart from "the scheduler stopped me".
#[derive(Error, Debug)]
pub enum SchedError {
    /// Invalid arguments, configuration, or unusable state.
    #[error("{0}")]
    UserError(String),

    /// The lock was not acquired within the configured bound.
    #[error("timed out after {}s waiting for the execution lock", waited.as_secs())]
    ContentionTimeout { waited: Duration },

    /// A dependency cycle was found starting from this waiter.
    #[error("deadlock detected: {}", format_cycle(cycle))]
    Deadlock { cycle: Vec<u32> },

    /// The pipeline this invocation belongs to ran past its deadline.
    #[error(
        "pipeline deadline exceeded ({}s elapsed, limit {}s)",
        elapsed.as_secs(),
        limit.as_secs()
    )]
    PipelineDeadlineExceeded { elapsed: Duration, limit: Duration },

    /// A trapped signal interrupted waiting or execution.
    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },

    /// Lock state could not be read or written.
    #[error("lock operation failed: {0}")]
    Lock(String),

    /// Spawning or supervising a process failed.
    #[error("process operation failed: {0}")]
    Process(String),
}

impl SchedError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedError::UserError(_) => exit_codes::USER_ERROR,
            SchedError::ContentionTimeout { .. } => exit_codes::LOCK_TIMEOUT,
            SchedError::Deadlock { .. } => exit_codes::DEADLOCK,
            SchedError::PipelineDeadlineExceeded { .. } => exit_codes::PIPELINE_DEADLINE,
            SchedError::Interrupted { signal } => exit_codes::from_signal(*signal),
            SchedError::Lock(_) => exit_codes::USER_ERROR,
            SchedError::Process(_) => exit_codes::USER_ERROR,
        }
    }

    /// Wrap an I/O failure on `path` as a user-facing error.
    pub fn io(action: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        SchedError::UserError(format!("failed to {} '{}': {}", action, path.display(), err))
    }
}

fn format_cycle(cycle: &[u32]) -> String {
    cycle
        .iter()
        .map(|pid| pid.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedError>;
