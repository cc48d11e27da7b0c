//! Lock Record stored in `lock.json`.

use crate::error::Result;
use crate::fs::read_json;
use crate::process::OwnerIdentity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The single exclusive-execution claim for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process holding the lock.
    #[serde(flatten)]
    pub owner: OwnerIdentity,

    /// `user@host` of the holder, for humans.
    pub user: String,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Command the holder is running.
    pub command: String,
}

impl LockRecord {
    /// Create a record claiming the lock for `owner`.
    pub fn for_owner(owner: OwnerIdentity, command: &str) -> Self {
        Self {
            owner,
            user: get_owner_string(),
            acquired_at: Utc::now(),
            command: command.to_string(),
        }
    }

    /// Read the record at `path`, if any.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn pid(&self) -> u32 {
        self.owner.pid
    }

    /// Whether the holder is gone and the record may be reclaimed.
    pub fn is_stale(&self) -> bool {
        !self.owner.is_live()
    }

    /// How long the lock has been held.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.acquired_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        format_age(self.age())
    }
}

/// Format a duration as `1d 2h`, `3h 4m`, `5m 6s` or `7s`.
pub fn format_age(age: Duration) -> String {
    let seconds = age.num_seconds().max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// Get the `user@host` string for lock records.
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
