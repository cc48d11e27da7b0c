//! Deadlock detection for nested invocations.
//!
//! Every waiter records one dependency edge, `edges/<waiter>.json`, naming
//! the process it is blocked on. Only the waiter itself writes or clears its
//! edge. A supervised command that invokes onelane again while its parent
//! holds the lock can never be admitted: the holder waits for the command,
//! and the command waits for the holder.
//!
//! The graph walked here combines the recorded edges with one implicit edge
//! per holder: a holder that is an ancestor of a waiter is blocked on that
//! waiter finishing. A walk that returns to its starting waiter is a cycle,
//! and the detecting waiter aborts itself.

use crate::context::ProjectContext;
use crate::error::Result;
use crate::fs::{SectionLock, read_json, remove_if_exists, write_json};
use crate::process::{ProcessTable, is_alive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// `waiter` is blocked on `holder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub waiter: u32,
    pub holder: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Record (or replace) the edge owned by `waiter`.
pub fn record_edge(ctx: &ProjectContext, waiter: u32, holder: u32) -> Result<()> {
    let edge = DependencyEdge {
        waiter,
        holder,
        recorded_at: Utc::now(),
    };
    write_json(ctx.edge_path(waiter), &edge)
}

/// Remove the edge owned by `waiter`. Idempotent.
pub fn clear_edge(ctx: &ProjectContext, waiter: u32) -> Result<bool> {
    remove_if_exists(ctx.edge_path(waiter))
}

/// Recorded edges of live waiters, keyed by waiter.
///
/// Unreadable edge files and edges left by dead waiters are ignored.
pub fn load_edges(ctx: &ProjectContext) -> Result<HashMap<u32, u32>> {
    let dir = ctx.edges_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(crate::error::SchedError::io("read directory", &dir, e)),
    };

    let mut edges = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match read_json::<_, DependencyEdge>(&path) {
            Ok(Some(edge)) if is_alive(edge.waiter) => {
                edges.insert(edge.waiter, edge.holder);
            }
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable edge"),
        }
    }
    Ok(edges)
}

/// Add "holder waits for its descendant waiter" edges.
///
/// Holders that already have a recorded edge keep it.
pub fn with_ancestry(mut edges: HashMap<u32, u32>, table: &ProcessTable) -> HashMap<u32, u32> {
    let mut implicit = Vec::new();
    for (&waiter, &holder) in &edges {
        if !edges.contains_key(&holder) && table.is_ancestor(holder, waiter) {
            implicit.push((holder, waiter));
        }
    }
    for (holder, waiter) in implicit {
        edges.entry(holder).or_insert(waiter);
    }
    edges
}

/// Follow edges from `start`; returns the cycle if the walk comes back.
///
/// The returned path begins and ends with `start`. A walk that dead-ends, or
/// loops without passing through `start`, reports nothing: that cycle
/// belongs to other participants to detect.
pub fn find_cycle(edges: &HashMap<u32, u32>, start: u32) -> Option<Vec<u32>> {
    let mut path = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;

    while let Some(&next) = edges.get(&current) {
        path.push(next);
        if next == start {
            return Some(path);
        }
        if !seen.insert(next) {
            return None;
        }
        current = next;
    }
    None
}

/// Look for a cycle through `waiter`.
///
/// Walks are serialized across processes by `deadlock.lock`; when another
/// waiter is mid-walk this returns `Ok(None)` and the check is retried on a
/// later poll.
pub fn detect(ctx: &ProjectContext, waiter: u32) -> Result<Option<Vec<u32>>> {
    let Some(_walk) = SectionLock::try_acquire(&ctx.deadlock_lock_path())? else {
        debug!(waiter, "deadlock walk in progress elsewhere; skipping");
        return Ok(None);
    };

    let edges = load_edges(ctx)?;
    if !edges.contains_key(&waiter) {
        return Ok(None);
    }

    let edges = with_ancestry(edges, &ProcessTable::capture());
    let cycle = find_cycle(&edges, waiter);
    if let Some(cycle) = &cycle {
        warn!(waiter, ?cycle, "dependency cycle detected");
    }
    Ok(cycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessEntry;
    use crate::test_support::{LiveProcess, dead_pid, test_context};

    fn graph(pairs: &[(u32, u32)]) -> HashMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_find_cycle_three_waiters() {
        let edges = graph(&[(1, 2), (2, 3), (3, 1)]);
        assert_eq!(find_cycle(&edges, 1), Some(vec![1, 2, 3, 1]));
        assert_eq!(find_cycle(&edges, 2), Some(vec![2, 3, 1, 2]));
    }

    #[test]
    fn test_find_cycle_chain_without_cycle() {
        let edges = graph(&[(1, 2), (2, 3)]);
        assert_eq!(find_cycle(&edges, 1), None);
        assert_eq!(find_cycle(&edges, 4), None);
    }

    #[test]
    fn test_find_cycle_ignores_cycles_elsewhere() {
        // 1 waits on a 2 <-> 3 cycle it is not part of.
        let edges = graph(&[(1, 2), (2, 3), (3, 2)]);
        assert_eq!(find_cycle(&edges, 1), None);
        assert!(find_cycle(&edges, 2).is_some());
    }

    #[test]
    fn test_ancestor_holder_closes_cycle() {
        // 10 holds the lock and runs 11, which runs 12 waiting on 10.
        let table = ProcessTable::from_entries([
            ProcessEntry {
                pid: 10,
                parent: Some(1),
                rss: 0,
                cmdline: "onelane run -- make".into(),
            },
            ProcessEntry {
                pid: 11,
                parent: Some(10),
                rss: 0,
                cmdline: "make".into(),
            },
            ProcessEntry {
                pid: 12,
                parent: Some(11),
                rss: 0,
                cmdline: "onelane run -- cargo build".into(),
            },
        ]);

        let edges = with_ancestry(graph(&[(12, 10)]), &table);
        assert_eq!(find_cycle(&edges, 12), Some(vec![12, 10, 12]));
    }

    #[test]
    fn test_unrelated_holder_is_not_a_cycle() {
        let table = ProcessTable::from_entries([
            ProcessEntry {
                pid: 10,
                parent: Some(1),
                rss: 0,
                cmdline: "a".into(),
            },
            ProcessEntry {
                pid: 20,
                parent: Some(1),
                rss: 0,
                cmdline: "b".into(),
            },
        ]);

        let edges = with_ancestry(graph(&[(20, 10)]), &table);
        assert_eq!(find_cycle(&edges, 20), None);
    }

    #[test]
    fn test_detect_chain_of_waiters() {
        let (_temp_dir, ctx) = test_context();
        let a = LiveProcess::spawn();
        let b = LiveProcess::spawn();
        let c = LiveProcess::spawn();

        record_edge(&ctx, a.pid(), b.pid()).unwrap();
        record_edge(&ctx, b.pid(), c.pid()).unwrap();
        record_edge(&ctx, c.pid(), a.pid()).unwrap();

        let cycle = detect(&ctx, a.pid()).unwrap().unwrap();
        assert_eq!(cycle, vec![a.pid(), b.pid(), c.pid(), a.pid()]);
    }

    #[test]
    fn test_detect_waiting_on_own_ancestor() {
        let (_temp_dir, ctx) = test_context();
        let me = std::process::id();
        let parent = std::os::unix::process::parent_id();

        record_edge(&ctx, me, parent).unwrap();
        assert_eq!(detect(&ctx, me).unwrap(), Some(vec![me, parent, me]));
    }

    #[test]
    fn test_detect_without_edge() {
        let (_temp_dir, ctx) = test_context();
        assert_eq!(detect(&ctx, std::process::id()).unwrap(), None);
    }

    #[test]
    fn test_detect_skips_while_another_walk_runs() {
        let (_temp_dir, ctx) = test_context();
        let a = LiveProcess::spawn();
        let b = LiveProcess::spawn();
        record_edge(&ctx, a.pid(), b.pid()).unwrap();
        record_edge(&ctx, b.pid(), a.pid()).unwrap();

        let held = SectionLock::acquire(&ctx.deadlock_lock_path()).unwrap();
        assert_eq!(detect(&ctx, a.pid()).unwrap(), None);
        drop(held);
        assert!(detect(&ctx, a.pid()).unwrap().is_some());
    }

    #[test]
    fn test_dead_waiters_and_garbage_are_ignored() {
        let (_temp_dir, ctx) = test_context();
        let live = LiveProcess::spawn();
        record_edge(&ctx, dead_pid(), live.pid()).unwrap();
        record_edge(&ctx, live.pid(), 4_000_000).unwrap();
        std::fs::write(ctx.edges_dir().join("junk.json"), "nope").unwrap();

        let edges = load_edges(&ctx).unwrap();
        assert_eq!(edges, graph(&[(live.pid(), 4_000_000)]));
    }

    #[test]
    fn test_clear_edge_is_idempotent() {
        let (_temp_dir, ctx) = test_context();
        let me = std::process::id();
        record_edge(&ctx, me, 1).unwrap();

        assert!(clear_edge(&ctx, me).unwrap());
        assert!(!clear_edge(&ctx, me).unwrap());
    }
}
