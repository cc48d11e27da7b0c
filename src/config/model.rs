//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the scheduler.
///
/// Loaded from `.onelane.yaml` at the project root (optional), then
/// overridden by environment variables. Unknown fields in the YAML are
/// ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Supervision
    // =========================================================================
    /// Per-process resident memory ceiling in MiB (0 disables the monitor).
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    /// Seconds between memory samples.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Grace period between the graceful and the forced termination signal.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    // =========================================================================
    // Admission
    // =========================================================================
    /// Seconds to wait for the execution lock (0 waits indefinitely).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Seconds a whole pipeline may stay live (0 disables the deadline).
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,

    /// Milliseconds between lock acquisition attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Whether waiters look for dependency cycles.
    #[serde(default = "default_true")]
    pub deadlock_detection: bool,

    /// Poll cycles between deadlock checks.
    #[serde(default = "default_deadlock_check_every")]
    pub deadlock_check_every: u32,

    // =========================================================================
    // Orphan reaping
    // =========================================================================
    /// Regexes matched against command lines of tools that may be orphaned.
    #[serde(default = "default_orphan_signatures")]
    pub orphan_signatures: Vec<String>,

    /// Poll cycles between reaper sweeps while waiting.
    #[serde(default = "default_reap_every")]
    pub reap_every: u32,

    /// Number of audit entries reported by `status`.
    #[serde(default = "default_audit_keep")]
    pub audit_keep: usize,

    // =========================================================================
    // Pre-checks and storage
    // =========================================================================
    /// Parallel job cap exported to build tools.
    #[serde(default = "default_build_jobs")]
    pub build_jobs: usize,

    /// Root directory for per-project state (default: runtime dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_base_dir: Option<PathBuf>,

    /// Verbose (debug) logging.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            check_interval_secs: default_check_interval_secs(),
            grace_period_ms: default_grace_period_ms(),
            timeout_secs: default_timeout_secs(),
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            deadlock_detection: default_true(),
            deadlock_check_every: default_deadlock_check_every(),
            orphan_signatures: default_orphan_signatures(),
            reap_every: default_reap_every(),
            audit_keep: default_audit_keep(),
            build_jobs: default_build_jobs(),
            lock_base_dir: None,
            verbose: false,
        }
    }
}

impl Config {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Lock acquisition bound; `None` means wait indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Pipeline deadline; `None` disables the watchdog.
    pub fn pipeline_timeout(&self) -> Option<Duration> {
        (self.pipeline_timeout_secs > 0).then(|| Duration::from_secs(self.pipeline_timeout_secs))
    }

    /// Memory ceiling in bytes; `None` disables the monitor.
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        (self.memory_limit_mb > 0).then(|| self.memory_limit_mb * 1024 * 1024)
    }
}
