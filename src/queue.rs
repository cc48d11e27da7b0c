//! Admission Queue.
//!
//! An ordered record of every process waiting for, or holding, the execution
//! lock, stored as NDJSON in `queue.ndjson`. The queue is advisory: it drives
//! "position N of M" reporting and lets the pipeline watchdog find every
//! participant, but it never decides who is admitted next. Whoever wins the
//! lock race runs.
//!
//! Every mutation is a read-modify-write under the state section lock. The
//! `*_locked` functions expect the caller to hold it already.

use crate::context::ProjectContext;
use crate::error::{Result, SchedError};
use crate::fs::{atomic_write, with_section};
use crate::process::OwnerIdentity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::debug;

/// One waiting or executing process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub owner: OwnerIdentity,

    /// When the process joined the queue.
    pub enqueued_at: DateTime<Utc>,

    /// Command text, for display and audit.
    pub command: String,
}

impl QueueEntry {
    pub fn new(owner: OwnerIdentity, command: &str) -> Self {
        Self {
            owner,
            enqueued_at: Utc::now(),
            command: command.to_string(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.owner.pid
    }

    /// Time spent in the queue so far.
    pub fn waited(&self) -> Duration {
        Utc::now().signed_duration_since(self.enqueued_at)
    }
}

/// Append `entry` unless its PID is already queued.
///
/// Returns whether an entry was added.
pub fn enqueue(ctx: &ProjectContext, entry: &QueueEntry) -> Result<bool> {
    ctx.ensure_state_dir()?;
    with_section(&ctx.state_lock_path(), || enqueue_locked(ctx, entry))
}

/// [`enqueue`] for callers holding the state section lock.
pub fn enqueue_locked(ctx: &ProjectContext, entry: &QueueEntry) -> Result<bool> {
    let mut entries = read_entries(ctx)?;
    if entries.iter().any(|e| e.pid() == entry.pid()) {
        return Ok(false);
    }

    // Entries left behind by crashed processes would inflate positions.
    let before = entries.len();
    entries.retain(|e| e.owner.is_live());
    if entries.len() != before {
        debug!(pruned = before - entries.len(), "pruned dead queue entries");
    }

    entries.push(entry.clone());
    write_entries(ctx, &entries)?;
    debug!(pid = entry.pid(), position = entries.len(), "enqueued");
    Ok(true)
}

/// Remove every entry for `pid`. The caller holds the state section lock.
///
/// Safe to call repeatedly and on any exit path. Returns the number of
/// entries left in the queue.
pub fn dequeue_locked(ctx: &ProjectContext, pid: u32) -> Result<usize> {
    let mut entries = read_entries(ctx)?;
    let before = entries.len();
    entries.retain(|e| e.pid() != pid);

    if entries.len() != before {
        write_entries(ctx, &entries)?;
        debug!(pid, remaining = entries.len(), "dequeued");
    }
    Ok(entries.len())
}

/// 1-based rank of `pid` among live entries, and the live total.
pub fn position(ctx: &ProjectContext, pid: u32) -> Result<Option<(usize, usize)>> {
    let live: Vec<QueueEntry> = list(ctx)?;
    Ok(live
        .iter()
        .position(|e| e.pid() == pid)
        .map(|index| (index + 1, live.len())))
}

/// Live entries in insertion order.
pub fn list(ctx: &ProjectContext) -> Result<Vec<QueueEntry>> {
    Ok(read_entries(ctx)?
        .into_iter()
        .filter(|e| e.owner.is_live())
        .collect())
}

/// All entries as stored, including those of dead processes.
pub fn read_entries(ctx: &ProjectContext) -> Result<Vec<QueueEntry>> {
    let path = ctx.queue_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SchedError::io("read queue", &path, e)),
    };

    // A malformed line is skipped rather than failing every participant.
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Replace the queue with `entries`.
pub fn write_entries(ctx: &ProjectContext, entries: &[QueueEntry]) -> Result<()> {
    let mut content = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| SchedError::UserError(format!("failed to serialize queue entry: {}", e)))?;
        content.push_str(&line);
        content.push('\n');
    }
    atomic_write(ctx.queue_path(), content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{LiveProcess, dead_pid, test_context};

    fn entry_for(pid: u32, command: &str) -> QueueEntry {
        QueueEntry::new(OwnerIdentity::of(pid), command)
    }

    #[test]
    fn test_enqueue_is_idempotent_per_pid() {
        let (_temp_dir, ctx) = test_context();
        let me = QueueEntry::new(OwnerIdentity::current(), "cargo test");

        assert!(enqueue(&ctx, &me).unwrap());
        assert!(!enqueue(&ctx, &me).unwrap());
        assert_eq!(list(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_position_follows_insertion_order() {
        let (_temp_dir, ctx) = test_context();
        let first = LiveProcess::spawn();
        let second = LiveProcess::spawn();

        enqueue(&ctx, &entry_for(first.pid(), "a")).unwrap();
        enqueue(&ctx, &entry_for(second.pid(), "b")).unwrap();
        enqueue(&ctx, &QueueEntry::new(OwnerIdentity::current(), "c")).unwrap();

        assert_eq!(position(&ctx, first.pid()).unwrap(), Some((1, 3)));
        assert_eq!(position(&ctx, std::process::id()).unwrap(), Some((3, 3)));
        assert_eq!(position(&ctx, 1).unwrap(), None);
    }

    #[test]
    fn test_dequeue_twice_is_noop() {
        let (_temp_dir, ctx) = test_context();
        let other = LiveProcess::spawn();
        enqueue(&ctx, &entry_for(other.pid(), "keep")).unwrap();
        enqueue(&ctx, &QueueEntry::new(OwnerIdentity::current(), "mine")).unwrap();

        assert_eq!(dequeue_locked(&ctx, std::process::id()).unwrap(), 1);
        assert_eq!(dequeue_locked(&ctx, std::process::id()).unwrap(), 1);
        assert_eq!(list(&ctx).unwrap()[0].command, "keep");
    }

    #[test]
    fn test_dequeue_without_queue_file() {
        let (_temp_dir, ctx) = test_context();
        assert_eq!(dequeue_locked(&ctx, 12345).unwrap(), 0);
        assert!(!ctx.queue_path().exists());
    }

    #[test]
    fn test_dead_entries_are_hidden_and_pruned() {
        let (_temp_dir, ctx) = test_context();
        let ghost = QueueEntry::new(
            OwnerIdentity {
                pid: dead_pid(),
                started_at: None,
            },
            "ghost",
        );
        write_entries(&ctx, &[ghost]).unwrap();

        assert!(list(&ctx).unwrap().is_empty());
        assert_eq!(read_entries(&ctx).unwrap().len(), 1);

        enqueue(&ctx, &QueueEntry::new(OwnerIdentity::current(), "live")).unwrap();
        let stored = read_entries(&ctx).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].command, "live");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (_temp_dir, ctx) = test_context();
        let good = serde_json::to_string(&QueueEntry::new(OwnerIdentity::current(), "ok")).unwrap();
        std::fs::write(ctx.queue_path(), format!("garbage\n{}\n\n", good)).unwrap();

        let entries = read_entries(&ctx).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command, "ok");
    }

    #[test]
    fn test_waited_grows() {
        let mut entry = QueueEntry::new(OwnerIdentity::current(), "x");
        entry.enqueued_at = Utc::now() - Duration::seconds(90);
        assert!(entry.waited().num_seconds() >= 90);
    }
}
