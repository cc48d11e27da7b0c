//! Process-tree snapshots and graduated termination.

use super::liveness::is_alive;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, warn};

/// How often `terminate` re-checks survivors during the grace period.
const SURVIVOR_POLL: Duration = Duration::from_millis(50);

/// One row of a process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    /// Resident set size in bytes.
    pub rss: u64,
    /// Full command line, arguments joined by spaces.
    pub cmdline: String,
}

/// Point-in-time view of the host's processes.
///
/// Not persisted; captured on demand and queried for parent/child
/// relationships and resident memory.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: BTreeMap<u32, ProcessEntry>,
}

impl ProcessTable {
    /// Capture every process on the host (threads excluded).
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet),
        );

        let entries = system
            .processes()
            .values()
            .filter(|p| p.thread_kind().is_none())
            .map(|p| {
                let cmdline = if p.cmd().is_empty() {
                    p.name().to_string_lossy().into_owned()
                } else {
                    p.cmd()
                        .iter()
                        .map(|arg| arg.to_string_lossy())
                        .collect::<Vec<_>>()
                        .join(" ")
                };
                ProcessEntry {
                    pid: p.pid().as_u32(),
                    parent: p.parent().map(|pp| pp.as_u32()),
                    rss: p.memory(),
                    cmdline,
                }
            });

        Self::from_entries(entries)
    }

    /// Build a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = ProcessEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.pid, e)).collect(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.entries.contains_key(&pid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.entries.values()
    }

    /// Direct children of `pid`.
    pub fn children(&self, pid: u32) -> Vec<u32> {
        self.entries
            .values()
            .filter(|e| e.parent == Some(pid))
            .map(|e| e.pid)
            .collect()
    }

    /// All transitive descendants of `root`, ordered leaves-first.
    ///
    /// Every process appears after all of its own descendants, so signalling
    /// in this order never leaves a parent around to respawn a killed child.
    /// `root` itself is not included.
    pub fn descendants(&self, root: u32) -> Vec<u32> {
        let mut order = Vec::new();
        let mut seen = HashSet::from([root]);
        self.collect_post_order(root, &mut seen, &mut order);
        order
    }

    fn collect_post_order(&self, pid: u32, seen: &mut HashSet<u32>, order: &mut Vec<u32>) {
        for child in self.children(pid) {
            if seen.insert(child) {
                self.collect_post_order(child, seen, order);
                order.push(child);
            }
        }
    }

    /// `root` and its descendants, leaves-first with `root` last.
    pub fn subtree(&self, root: u32) -> Vec<u32> {
        let mut pids = self.descendants(root);
        if self.contains(root) {
            pids.push(root);
        }
        pids
    }

    /// Parent chain of `pid`, nearest first.
    pub fn ancestors(&self, pid: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([pid]);
        let mut current = self.get(pid).and_then(|e| e.parent);

        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = self.get(parent).and_then(|e| e.parent);
        }
        chain
    }

    /// Whether `ancestor` appears in the parent chain of `pid`.
    pub fn is_ancestor(&self, ancestor: u32, pid: u32) -> bool {
        self.ancestors(pid).contains(&ancestor)
    }

    /// Resident memory of `root` plus all of its descendants, in bytes.
    pub fn tree_rss(&self, root: u32) -> u64 {
        self.subtree(root)
            .iter()
            .filter_map(|pid| self.get(*pid))
            .map(|e| e.rss)
            .sum()
    }
}

/// Outcome of a [`terminate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Processes that received the graceful signal.
    pub signalled: Vec<u32>,
    /// Processes that survived the grace period and were force-killed.
    pub forced: Vec<u32>,
}

impl TerminationReport {
    pub fn is_empty(&self) -> bool {
        self.signalled.is_empty()
    }
}

/// Terminate `root` and every descendant.
///
/// Sends SIGTERM leaves-first, waits up to `grace` for the set to exit, then
/// sends SIGKILL to survivors. Members that have already exited are skipped
/// silently. The calling process is never signalled.
pub fn terminate(root: u32, grace: Duration) -> TerminationReport {
    let me = std::process::id();
    let table = ProcessTable::capture();
    let mut targets: Vec<u32> = table.subtree(root);
    if !targets.contains(&root) && is_alive(root) {
        targets.push(root);
    }
    targets.retain(|&pid| pid != me);

    let mut report = TerminationReport::default();
    for &pid in &targets {
        if send(pid, Signal::SIGTERM) {
            report.signalled.push(pid);
        }
    }
    if report.signalled.is_empty() {
        return report;
    }
    debug!(root, count = report.signalled.len(), "sent SIGTERM to process tree");

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline && report.signalled.iter().any(|&pid| is_alive(pid)) {
        thread::sleep(SURVIVOR_POLL);
    }

    // Children forked during the grace period are caught by a fresh snapshot.
    let late = ProcessTable::capture();
    let mut survivors: Vec<u32> = report
        .signalled
        .iter()
        .flat_map(|&pid| late.subtree(pid))
        .filter(|&pid| pid != me)
        .collect();
    survivors.sort_unstable();
    survivors.dedup();

    for pid in survivors {
        if is_alive(pid) && send(pid, Signal::SIGKILL) {
            report.forced.push(pid);
        }
    }
    if !report.forced.is_empty() {
        warn!(root, forced = ?report.forced, "processes ignored SIGTERM; sent SIGKILL");
    }

    report
}

/// Deliver `signal` to `pid`, returning whether it was delivered.
fn send(pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 1 {
        return false;
    }
    kill(Pid::from_raw(raw), signal).is_ok()
}
