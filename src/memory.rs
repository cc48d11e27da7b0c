//! Memory-threshold monitor.
//!
//! A background thread attached to one root process. Every check interval
//! it sums the resident memory of the root and its descendants, warns when
//! the total passes half the ceiling, and terminates any single member whose
//! own resident memory exceeds the ceiling. Siblings of an offender keep
//! running. The thread exits when the root is gone or the monitor is
//! stopped.

use crate::process::{ProcessTable, is_alive, terminate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// A process terminated for exceeding the memory ceiling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryViolation {
    pub pid: u32,
    pub cmdline: String,
    /// Resident memory observed, in bytes.
    pub rss: u64,
    pub limit: u64,
    pub at: DateTime<Utc>,
}

/// Result of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySample {
    /// Resident memory of the whole tree, in bytes.
    pub total: u64,
    /// Members individually above the ceiling.
    pub offenders: Vec<(u32, u64, String)>,
}

/// Sample the tree rooted at `root` against `limit` bytes.
pub fn sample(table: &ProcessTable, root: u32, limit: u64) -> MemorySample {
    let me = std::process::id();
    let offenders = table
        .subtree(root)
        .into_iter()
        .filter(|&pid| pid != me)
        .filter_map(|pid| table.get(pid))
        .filter(|e| e.rss > limit)
        .map(|e| (e.pid, e.rss, e.cmdline.clone()))
        .collect();

    MemorySample {
        total: table.tree_rss(root),
        offenders,
    }
}

/// Handle to a running monitor thread.
#[derive(Debug)]
pub struct MemoryMonitor {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
    violations: Arc<Mutex<Vec<MemoryViolation>>>,
}

impl MemoryMonitor {
    /// Start monitoring the tree rooted at `root`.
    pub fn spawn(root: u32, limit: u64, interval: Duration, grace: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let violations = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&violations);

        let handle = thread::spawn(move || {
            debug!(root, limit_mb = limit / MIB, "memory monitor started");
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                if !is_alive(root) {
                    break;
                }

                for violation in check(root, limit, grace) {
                    if let Ok(mut list) = recorded.lock() {
                        list.push(violation);
                    }
                }
            }
            debug!(root, "memory monitor stopped");
        });

        Self {
            stop,
            handle: Some(handle),
            violations,
        }
    }

    /// Violations recorded so far.
    pub fn violations(&self) -> Vec<MemoryViolation> {
        self.violations
            .lock()
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Stop the thread and return every violation it recorded.
    pub fn stop(mut self) -> Vec<MemoryViolation> {
        self.shutdown();
        self.violations()
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One monitoring pass: warn on high usage, terminate offenders.
fn check(root: u32, limit: u64, grace: Duration) -> Vec<MemoryViolation> {
    let table = ProcessTable::capture();
    let sample = sample(&table, root, limit);

    if sample.total > limit / 2 {
        warn!(
            root,
            rss_mb = sample.total / MIB,
            limit_mb = limit / MIB,
            "high memory usage in supervised command"
        );
    }

    let mut violations = Vec::new();
    for (pid, rss, cmdline) in sample.offenders {
        warn!(
            pid,
            rss_mb = rss / MIB,
            limit_mb = limit / MIB,
            cmdline = %cmdline,
            "process exceeded memory limit; terminating"
        );
        terminate(pid, grace);
        violations.push(MemoryViolation {
            pid,
            cmdline,
            rss,
            limit,
            at: Utc::now(),
        });
    }
    violations
}
