//! Config loading, environment overrides, and validation.

use super::model::Config;
use super::types::{parse_duration, parse_flag};
use crate::error::{SchedError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

/// Name of the optional per-project config file.
pub const CONFIG_FILE_NAME: &str = ".onelane.yaml";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content =
            std::fs::read_to_string(path).map_err(|e| SchedError::io("read config file", path, e))?;

        Self::from_yaml(&content)
    }

    /// Resolve the effective config for a project: file (if present), then
    /// process environment.
    pub fn resolve(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        let config = if path.is_file() {
            Self::load(&path)?
        } else {
            Self::default()
        };

        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| SchedError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Recognized variables: `MEMORY_LIMIT_MB`, `CHECK_INTERVAL`, `TIMEOUT`,
    /// `PIPELINE_TIMEOUT`, `POLL_INTERVAL_MS`, `GRACE_PERIOD_MS`, `VERBOSE`,
    /// `DEADLOCK_DETECTION`, `BUILD_JOBS`, `LOCK_BASE_DIR`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MEMORY_LIMIT_MB") {
            self.memory_limit_mb = parse_number("MEMORY_LIMIT_MB", &raw)?;
        }
        if let Some(raw) = lookup("CHECK_INTERVAL") {
            self.check_interval_secs = parse_secs("CHECK_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("TIMEOUT") {
            self.timeout_secs = parse_secs("TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("PIPELINE_TIMEOUT") {
            self.pipeline_timeout_secs = parse_secs("PIPELINE_TIMEOUT", &raw)?;
        }
        if let Some(raw) = lookup("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("GRACE_PERIOD_MS") {
            self.grace_period_ms = parse_number("GRACE_PERIOD_MS", &raw)?;
        }
        if let Some(raw) = lookup("VERBOSE") {
            self.verbose = parse_bool("VERBOSE", &raw)?;
        }
        if let Some(raw) = lookup("DEADLOCK_DETECTION") {
            self.deadlock_detection = parse_bool("DEADLOCK_DETECTION", &raw)?;
        }
        if let Some(raw) = lookup("BUILD_JOBS") {
            self.build_jobs = parse_number("BUILD_JOBS", &raw)?;
        }
        if let Some(raw) = lookup("LOCK_BASE_DIR")
            && !raw.trim().is_empty()
        {
            self.lock_base_dir = Some(PathBuf::from(raw));
        }

        Ok(self)
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `check_interval_secs` and `poll_interval_ms` must be positive
    /// - `deadlock_check_every` and `reap_every` must be positive
    /// - `build_jobs` must be positive
    /// - every orphan signature must be a valid regex
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(invalid("check_interval must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }
        if self.deadlock_check_every == 0 || self.reap_every == 0 {
            return Err(invalid(
                "deadlock_check_every and reap_every must be greater than 0",
            ));
        }
        if self.build_jobs == 0 {
            return Err(invalid("build_jobs must be greater than 0"));
        }

        self.compiled_signatures()?;
        Ok(())
    }

    /// Compile `orphan_signatures` into regexes.
    pub fn compiled_signatures(&self) -> Result<Vec<Regex>> {
        self.orphan_signatures
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    invalid(&format!("invalid orphan signature '{}': {}", pattern, e))
                })
            })
            .collect()
    }
}

fn invalid(message: &str) -> SchedError {
    SchedError::UserError(format!("config validation failed: {}", message))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(&format!("{} must be a non-negative integer (got '{}')", key, raw)))
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    parse_duration(raw)
        .map(|d| d.as_secs())
        .ok_or_else(|| invalid(&format!("{} must be a duration like 30, 2s, 5m or 24h (got '{}')", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    parse_flag(raw).ok_or_else(|| invalid(&format!("{} must be 0 or 1 (got '{}')", key, raw)))
}
