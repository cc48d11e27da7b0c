//! Configuration defaults and value parsing for onelane.
//!
//! This module defines the default value functions used by the Config struct
//! and the duration syntax accepted from the environment.

use std::time::Duration;

/// Default command-line signatures of long-running tools the orphan reaper
/// watches for. Each entry is a regex matched against the full command line.
pub fn default_orphan_signatures() -> Vec<String> {
    vec![
        r"(^|/)pytest(\s|$)".to_string(),
        r"python[0-9.]* -m pytest".to_string(),
        r"cargo(-\S+)? (test|nextest)".to_string(),
        r"(^|/)jest(\s|$)".to_string(),
        r"(^|/)vitest(\s|$)".to_string(),
        r"(^|/)mocha(\s|$)".to_string(),
        r"(^|/)go test(\s|$)".to_string(),
        r"(npm|yarn|pnpm) (run )?test".to_string(),
        r"(^|/)tox(\s|$)".to_string(),
    ]
}

// Default value functions for serde
pub(crate) fn default_memory_limit_mb() -> u64 {
    2048
}
pub(crate) fn default_check_interval_secs() -> u64 {
    5
}
pub(crate) fn default_timeout_secs() -> u64 {
    86_400
}
pub(crate) fn default_pipeline_timeout_secs() -> u64 {
    86_400
}
pub(crate) fn default_poll_interval_ms() -> u64 {
    1_000
}
pub(crate) fn default_grace_period_ms() -> u64 {
    2_000
}
pub(crate) fn default_deadlock_check_every() -> u32 {
    5
}
pub(crate) fn default_reap_every() -> u32 {
    30
}
pub(crate) fn default_audit_keep() -> usize {
    20
}
pub(crate) fn default_true() -> bool {
    true
}

/// Half of the available parallelism, never less than one.
pub(crate) fn default_build_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

/// Parse a duration written as plain seconds (`30`) or with a unit suffix
/// (`500ms`, `2s`, `5m`, `24h`).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3_600)?)),
        _ => None,
    }
}

/// Parse a boolean environment flag (`1`, `true`, `yes`, `on`).
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
