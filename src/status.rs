//! Read-only observability snapshot.
//!
//! Collects the lock holder, the queue with wait durations, the pipeline
//! deadline and the recent orphan audit trail. Nothing here mutates state,
//! so dashboards can poll it freely.

use crate::context::ProjectContext;
use crate::deadline::{self, FaultRecord};
use crate::error::{Result, SchedError};
use crate::fs::read_json;
use crate::lock::{self, format_age};
use crate::process::is_alive;
use crate::queue;
use crate::reaper::{self, OrphanRecord};
use crate::scheduler::ExecutionRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct HolderStatus {
    pub pid: u32,
    pub user: String,
    pub command: String,
    pub acquired_at: DateTime<Utc>,
    pub held_secs: i64,
    /// False when the record is stale and will be reclaimed by the next
    /// waiter.
    pub live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub position: usize,
    pub pid: u32,
    pub command: String,
    pub enqueued_at: DateTime<Utc>,
    pub waited_secs: i64,
    /// Whether this entry is the current lock holder.
    pub executing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineStatus {
    pub pipeline_id: String,
    pub started_at: DateTime<Utc>,
    pub limit_secs: u64,
    pub remaining_secs: u64,
    pub expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchdog_pid: Option<u32>,
    pub watchdog_alive: bool,
}

/// Everything known about one project's scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub holder: Option<HolderStatus>,
    pub queue: Vec<QueueStatus>,
    pub deadline: Option<DeadlineStatus>,
    pub last_fault: Option<FaultRecord>,
    pub recent_orphans: Vec<OrphanRecord>,
}

impl StatusSnapshot {
    /// Read the current state of `ctx`. `audit_keep` bounds the number of
    /// audit entries included.
    pub fn collect(ctx: &ProjectContext, audit_keep: usize) -> Result<Self> {
        let execution: Option<ExecutionRecord> = read_json(ctx.owner_path()).ok().flatten();

        let holder = lock::current_holder(ctx).ok().flatten().map(|record| {
            let child_pid = execution
                .as_ref()
                .filter(|e| e.pid == record.pid())
                .and_then(|e| e.child_pid);
            HolderStatus {
                pid: record.pid(),
                user: record.user.clone(),
                command: record.command.clone(),
                acquired_at: record.acquired_at,
                held_secs: record.age().num_seconds(),
                live: !record.is_stale(),
                child_pid,
            }
        });

        let holder_pid = holder.as_ref().filter(|h| h.live).map(|h| h.pid);
        let queue = queue::list(ctx)?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| QueueStatus {
                position: index + 1,
                pid: entry.pid(),
                command: entry.command.clone(),
                enqueued_at: entry.enqueued_at,
                waited_secs: entry.waited().num_seconds(),
                executing: Some(entry.pid()) == holder_pid,
            })
            .collect();

        let deadline = deadline::read_record(ctx)?.map(|record| DeadlineStatus {
            remaining_secs: record.remaining().as_secs(),
            expired: record.is_expired(),
            watchdog_alive: record.watchdog_pid.is_some_and(is_alive),
            watchdog_pid: record.watchdog_pid,
            pipeline_id: record.pipeline_id,
            started_at: record.started_at,
            limit_secs: record.limit_secs,
        });

        Ok(Self {
            project_root: ctx.project_root.clone(),
            state_dir: ctx.state_dir.clone(),
            holder,
            queue,
            deadline,
            last_fault: read_json(ctx.fault_path()).ok().flatten(),
            recent_orphans: reaper::recent_audit(ctx, audit_keep)?,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SchedError::UserError(format!("failed to serialize status: {}", e)))
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Project: {}", self.project_root.display());
        let _ = writeln!(out, "State:   {}", self.state_dir.display());
        out.push('\n');

        match &self.holder {
            Some(h) => {
                let _ = writeln!(
                    out,
                    "Lock:    held by PID {} ({}) for {}{}",
                    h.pid,
                    h.user,
                    format_age(chrono::Duration::seconds(h.held_secs)),
                    if h.live { "" } else { " [stale]" }
                );
                let _ = writeln!(out, "         {}", h.command);
            }
            None => {
                let _ = writeln!(out, "Lock:    free");
            }
        }

        if self.queue.is_empty() {
            let _ = writeln!(out, "Queue:   empty");
        } else {
            let _ = writeln!(out, "Queue:   {} entr{}", self.queue.len(), plural_y(self.queue.len()));
            for q in &self.queue {
                let _ = writeln!(
                    out,
                    "  {:>3}. PID {:<8} {:<10} {}{}",
                    q.position,
                    q.pid,
                    format_age(chrono::Duration::seconds(q.waited_secs)),
                    q.command,
                    if q.executing { "  (running)" } else { "" }
                );
            }
        }

        match &self.deadline {
            Some(d) if d.expired => {
                let _ = writeln!(out, "Pipeline: {} EXPIRED (limit {}s)", d.pipeline_id, d.limit_secs);
            }
            Some(d) => {
                let _ = writeln!(
                    out,
                    "Pipeline: {} ({}s of {}s left, watchdog {})",
                    d.pipeline_id,
                    d.remaining_secs,
                    d.limit_secs,
                    if d.watchdog_alive { "running" } else { "missing" }
                );
            }
            None => {
                let _ = writeln!(out, "Pipeline: idle");
            }
        }

        if let Some(fault) = &self.last_fault {
            let _ = writeln!(
                out,
                "Last fault: pipeline {} at {} ({} terminated)",
                fault.pipeline_id,
                fault.at.to_rfc3339(),
                fault.terminated.len()
            );
        }

        if !self.recent_orphans.is_empty() {
            out.push('\n');
            let _ = writeln!(out, "Recently reaped orphans:");
            for o in &self.recent_orphans {
                let _ = writeln!(out, "  {} PID {:<8} {}", o.ts.to_rfc3339(), o.pid, o.cmdline);
            }
        }
        out
    }
}

fn plural_y(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}
