//! Orphan reaper.
//!
//! Long-running tools (test runners mostly) survive the death of whatever
//! launched them and keep consuming the host. A sweep looks for processes
//! whose command line matches a configured signature and whose parent is
//! gone or is init, terminates each one with its tree, and appends an entry
//! to `orphans.ndjson`.
//!
//! Sweeps are opportunistic: before an admission, periodically while
//! waiting, on exit, and on demand through `onelane reap`.

use crate::config::Config;
use crate::context::ProjectContext;
use crate::error::{Result, SchedError};
use crate::lock::get_owner_string;
use crate::process::{ProcessEntry, ProcessTable, terminate};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

/// PID of the host's init process.
const INIT_PID: u32 = 1;

/// Audit entry for one reaped orphan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub ts: DateTime<Utc>,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    pub cmdline: String,
    /// The signature pattern that matched.
    pub signature: String,
    /// Whether the process had to be force-killed.
    pub forced: bool,
    /// PID of the process that performed the sweep.
    pub reaper: u32,
    pub actor: String,
}

/// A process classified as orphaned.
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub entry: ProcessEntry,
    pub signature: String,
}

/// Orphan classifier and sweeper.
#[derive(Debug, Clone)]
pub struct Reaper {
    signatures: Vec<Regex>,
    grace: Duration,
}

impl Reaper {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_signatures(
            config.compiled_signatures()?,
            config.grace_period(),
        ))
    }

    pub fn with_signatures(signatures: Vec<Regex>, grace: Duration) -> Self {
        Self { signatures, grace }
    }

    /// Classify the orphans in `table`.
    ///
    /// The calling process and its ancestors are never candidates. A
    /// matching process is orphaned when it has no parent, its parent is no
    /// longer in the table, or its parent is init.
    pub fn find_orphans(&self, table: &ProcessTable, me: u32) -> Vec<Orphan> {
        let mut protected: HashSet<u32> = table.ancestors(me).into_iter().collect();
        protected.insert(me);

        table
            .entries()
            .filter(|e| !protected.contains(&e.pid))
            .filter(|e| match e.parent {
                None => true,
                Some(parent) => parent == INIT_PID || !table.contains(parent),
            })
            .filter_map(|e| {
                self.matching_signature(&e.cmdline).map(|signature| Orphan {
                    entry: e.clone(),
                    signature,
                })
            })
            .collect()
    }

    fn matching_signature(&self, cmdline: &str) -> Option<String> {
        self.signatures
            .iter()
            .find(|re| re.is_match(cmdline))
            .map(|re| re.as_str().to_string())
    }

    /// Terminate every orphan on the host and audit each one.
    ///
    /// Failures to write the audit trail are logged, never fatal: reaping
    /// is a recovery path.
    pub fn sweep(&self, ctx: &ProjectContext) -> Vec<OrphanRecord> {
        let me = std::process::id();
        let orphans = self.find_orphans(&ProcessTable::capture(), me);
        if orphans.is_empty() {
            debug!("orphan sweep found nothing");
            return Vec::new();
        }

        let actor = get_owner_string();
        let mut reaped = Vec::new();
        for orphan in orphans {
            let report = terminate(orphan.entry.pid, self.grace);
            if report.is_empty() {
                continue;
            }

            warn!(
                pid = orphan.entry.pid,
                cmdline = %orphan.entry.cmdline,
                signature = %orphan.signature,
                "reaped orphaned process"
            );

            let record = OrphanRecord {
                ts: Utc::now(),
                pid: orphan.entry.pid,
                parent: orphan.entry.parent,
                cmdline: orphan.entry.cmdline,
                signature: orphan.signature,
                forced: !report.forced.is_empty(),
                reaper: me,
                actor: actor.clone(),
            };
            if let Err(e) = append_audit(ctx, &record) {
                warn!(error = %e, "failed to write orphan audit entry");
            }
            reaped.push(record);
        }
        reaped
    }
}

/// Append one entry to the orphan audit trail.
pub fn append_audit(ctx: &ProjectContext, record: &OrphanRecord) -> Result<()> {
    let path = ctx.orphan_log_path();
    let line = serde_json::to_string(record)
        .map_err(|e| SchedError::UserError(format!("failed to serialize audit entry: {}", e)))?;

    ctx.ensure_state_dir()?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| SchedError::io("open audit log", &path, e))?;

    writeln!(file, "{}", line).map_err(|e| SchedError::io("append to", &path, e))
}

/// The last `n` audit entries, oldest first.
pub fn recent_audit(ctx: &ProjectContext, n: usize) -> Result<Vec<OrphanRecord>> {
    let path = ctx.orphan_log_path();
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SchedError::io("read audit log", &path, e)),
    };

    let records: Vec<OrphanRecord> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let skip = records.len().saturating_sub(n);
    Ok(records.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::is_alive;
    use crate::test_support::test_context;
    use std::process::{Command, Stdio};
    use std::thread;

    fn entry(pid: u32, parent: Option<u32>, cmdline: &str) -> ProcessEntry {
        ProcessEntry {
            pid,
            parent,
            rss: 0,
            cmdline: cmdline.to_string(),
        }
    }

    fn reaper(patterns: &[&str]) -> Reaper {
        Reaper::with_signatures(
            patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_classification() {
        // 100 is "us": 1 -> 50 -> 100.
        let table = ProcessTable::from_entries([
            entry(1, None, "init"),
            entry(50, Some(1), "pytest -x"),
            entry(100, Some(50), "pytest -k me"),
            entry(200, Some(1), "pytest tests/"),
            entry(300, Some(999), "python -m pytest"),
            entry(400, Some(50), "pytest live-parent"),
            entry(500, Some(1), "vim notes.txt"),
        ]);

        let orphans = reaper(&[r"pytest"]).find_orphans(&table, 100);
        let pids: Vec<u32> = orphans.iter().map(|o| o.entry.pid).collect();

        assert_eq!(pids, vec![200, 300]);
        assert_eq!(orphans[0].signature, "pytest");
    }

    #[test]
    fn test_no_signatures_no_orphans() {
        let table = ProcessTable::from_entries([entry(200, Some(1), "pytest")]);
        assert!(reaper(&[]).find_orphans(&table, 100).is_empty());
    }

    #[test]
    fn test_default_signatures_cover_common_runners() {
        let reaper = Reaper::new(&Config::default()).unwrap();
        let table = ProcessTable::from_entries([
            entry(200, Some(1), "/usr/bin/python3 /usr/bin/pytest -q"),
            entry(201, Some(1), "cargo test --workspace"),
            entry(202, Some(1), "node /repo/node_modules/.bin/jest --ci"),
            entry(203, Some(1), "go test ./..."),
            entry(204, Some(1), "bash"),
        ]);

        let pids: Vec<u32> = reaper
            .find_orphans(&table, 100)
            .iter()
            .map(|o| o.entry.pid)
            .collect();
        assert_eq!(pids, vec![200, 201, 202, 203]);
    }

    #[test]
    fn test_audit_round_trip_keeps_latest() {
        let (_temp_dir, ctx) = test_context();
        for pid in 1..=5 {
            let record = OrphanRecord {
                ts: Utc::now(),
                pid,
                parent: Some(1),
                cmdline: format!("pytest {}", pid),
                signature: "pytest".into(),
                forced: false,
                reaper: 42,
                actor: "me@host".into(),
            };
            append_audit(&ctx, &record).unwrap();
        }

        let recent = recent_audit(&ctx, 2).unwrap();
        assert_eq!(recent.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(recent_audit(&ctx, 10).unwrap().len(), 5);
    }

    #[test]
    fn test_recent_audit_without_log() {
        let (_temp_dir, ctx) = test_context();
        assert!(recent_audit(&ctx, 5).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_reaps_orphan_and_spares_child_with_live_parent() {
        let (_temp_dir, ctx) = test_context();

        // Backgrounded by a shell that exits at once: reparented away from us.
        Command::new("sh")
            .args(["-c", "sleep 61.25 >/dev/null 2>&1 &"])
            .status()
            .unwrap();
        let mut kept = Command::new("sleep")
            .arg("61.25")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(200));

        let orphan_pid = ProcessTable::capture()
            .entries()
            .find(|e| e.cmdline == "sleep 61.25" && e.pid != kept.id())
            .map(|e| (e.pid, e.parent))
            .unwrap();

        let records = reaper(&[r"^sleep 61\.25$"]).sweep(&ctx);

        // Only assert the kill where the orphan landed on init; sandboxes
        // with a subreaper keep a live parent.
        if orphan_pid.1 == Some(INIT_PID) {
            assert!(records.iter().any(|r| r.pid == orphan_pid.0));
            assert!(!is_alive(orphan_pid.0));
            assert_eq!(recent_audit(&ctx, 10).unwrap().len(), records.len());
        } else {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(orphan_pid.0 as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
        }

        assert!(records.iter().all(|r| r.pid != kept.id()));
        assert!(is_alive(kept.id()));
        kept.kill().unwrap();
        kept.wait().unwrap();
    }
}
