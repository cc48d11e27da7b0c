//! Pipeline deadline enforcement.
//!
//! A pipeline is the chain of commands that runs back to back while the
//! queue or the lock is non-empty. The first arrival into an idle project
//! writes `deadline.json` and starts a detached watchdog process that sleeps
//! until the deadline. If the record for its pipeline still exists when the
//! deadline passes, the watchdog declares a pipeline timeout fault: every
//! queued and executing participant is terminated and the project's lock
//! state is wiped. Later arrivals that find an expired record fail fast
//! instead of waiting to be killed.
//!
//! Each pipeline has a unique id, so a watchdog never acts on a newer
//! pipeline that reused the record path after its own finished.

use crate::context::ProjectContext;
use crate::error::{Result, SchedError};
use crate::fs::{read_json, remove_if_exists, with_section, write_json};
use crate::lock;
use crate::process::{self, is_alive};
use crate::queue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest single sleep of the watchdog between record checks.
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// The singleton deadline of the live pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRecord {
    /// Unique id of this pipeline.
    pub pipeline_id: String,

    /// When the first participant was admitted.
    pub started_at: DateTime<Utc>,

    /// Allowed duration of the whole pipeline, in seconds.
    pub limit_secs: u64,

    /// Watchdog enforcing this deadline, once spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog_pid: Option<u32>,
}

impl DeadlineRecord {
    pub fn new(limit: Duration) -> Self {
        let started_at = Utc::now();
        Self {
            pipeline_id: format!(
                "{}-{}",
                started_at.timestamp_nanos_opt().unwrap_or_default(),
                std::process::id()
            ),
            started_at,
            limit_secs: limit.as_secs(),
            watchdog_pid: None,
        }
    }

    pub fn limit(&self) -> Duration {
        Duration::from_secs(self.limit_secs)
    }

    pub fn elapsed(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> Duration {
        self.limit().saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.limit()
    }

    fn exceeded(&self) -> SchedError {
        SchedError::PipelineDeadlineExceeded {
            elapsed: self.elapsed(),
            limit: self.limit(),
        }
    }
}

/// Marker left behind by a pipeline timeout fault.
///
/// Terminated participants read it to exit with the deadline code rather
/// than the code of the signal that killed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub pipeline_id: String,
    pub at: DateTime<Utc>,
    pub limit_secs: u64,
    pub terminated: Vec<u32>,
}

/// How an arrival joined the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The caller started a new pipeline and must spawn its watchdog.
    Started(DeadlineRecord),
    /// The caller joined a live pipeline with a running watchdog.
    Joined(DeadlineRecord),
    /// The caller joined a live pipeline whose watchdog is gone.
    Unwatched(DeadlineRecord),
}

impl Admission {
    pub fn record(&self) -> &DeadlineRecord {
        match self {
            Admission::Started(r) | Admission::Joined(r) | Admission::Unwatched(r) => r,
        }
    }

    pub fn needs_watchdog(&self) -> bool {
        !matches!(self, Admission::Joined(_))
    }
}

/// Join the current pipeline, starting one if none is live.
///
/// Must be called with the state section lock held. Fails fast with
/// `PipelineDeadlineExceeded` when the existing pipeline is already past its
/// deadline.
pub fn admit_locked(ctx: &ProjectContext, limit: Duration) -> Result<Admission> {
    match read_record(ctx)? {
        Some(record) if record.is_expired() => Err(record.exceeded()),
        Some(record) if record.watchdog_pid.is_some_and(is_alive) => Ok(Admission::Joined(record)),
        Some(record) => Ok(Admission::Unwatched(record)),
        None => {
            let record = DeadlineRecord::new(limit);
            write_json(ctx.deadline_path(), &record)?;
            info!(pipeline = %record.pipeline_id, limit_secs = record.limit_secs, "started pipeline");
            Ok(Admission::Started(record))
        }
    }
}

/// Fail if pipeline `pipeline_id` has run past its deadline or was faulted.
pub fn check(ctx: &ProjectContext, pipeline_id: &str) -> Result<()> {
    if let Some(fault) = fault_for(ctx, pipeline_id) {
        let limit = Duration::from_secs(fault.limit_secs);
        return Err(SchedError::PipelineDeadlineExceeded {
            elapsed: limit,
            limit,
        });
    }
    match read_record(ctx)? {
        Some(record) if record.pipeline_id == pipeline_id && record.is_expired() => {
            Err(record.exceeded())
        }
        _ => Ok(()),
    }
}

pub fn read_record(ctx: &ProjectContext) -> Result<Option<DeadlineRecord>> {
    read_json(ctx.deadline_path())
}

/// Record the watchdog PID on the pipeline's record, if it is still current.
pub fn record_watchdog(ctx: &ProjectContext, pipeline_id: &str, pid: u32) -> Result<()> {
    with_section(&ctx.state_lock_path(), || {
        if let Some(mut record) = read_record(ctx)?
            && record.pipeline_id == pipeline_id
        {
            record.watchdog_pid = Some(pid);
            write_json(ctx.deadline_path(), &record)?;
        }
        Ok(())
    })
}

/// Delete the record when nobody is queued and nobody holds the lock.
///
/// Must be called with the state section lock held. Returns whether the
/// pipeline ended.
pub fn finish_if_idle_locked(ctx: &ProjectContext) -> Result<bool> {
    let queued = queue::read_entries(ctx)?
        .iter()
        .any(|e| e.owner.is_live());
    let locked = lock::current_holder(ctx)
        .ok()
        .flatten()
        .is_some_and(|holder| !holder.is_stale());

    if queued || locked {
        return Ok(false);
    }

    let ended = remove_if_exists(ctx.deadline_path())?;
    if ended {
        debug!("pipeline drained; deadline record removed");
    }
    Ok(ended)
}

/// The fault marker for `pipeline_id`, if that pipeline was faulted.
pub fn fault_for(ctx: &ProjectContext, pipeline_id: &str) -> Option<FaultRecord> {
    read_json::<_, FaultRecord>(ctx.fault_path())
        .ok()
        .flatten()
        .filter(|fault| fault.pipeline_id == pipeline_id)
}

/// Start the detached watchdog process for `record`.
///
/// The watchdog runs `<current exe> watchdog` in its own process group so
/// terminal interrupts and the exit of the spawning process do not reach it.
pub fn spawn_watchdog(ctx: &ProjectContext, record: &DeadlineRecord, grace: Duration) -> Result<u32> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()
        .map_err(|e| SchedError::Process(format!("failed to locate own executable: {}", e)))?;

    let mut child = Command::new(exe)
        .arg("watchdog")
        .arg("--state-dir")
        .arg(&ctx.state_dir)
        .arg("--pipeline-id")
        .arg(&record.pipeline_id)
        .arg("--grace-ms")
        .arg(grace.as_millis().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .process_group(0)
        .spawn()
        .map_err(|e| SchedError::Process(format!("failed to spawn pipeline watchdog: {}", e)))?;

    let pid = child.id();
    // Reap it if it finishes while we are still running.
    thread::spawn(move || {
        let _ = child.wait();
    });

    record_watchdog(ctx, &record.pipeline_id, pid)?;
    debug!(pid, pipeline = %record.pipeline_id, "spawned pipeline watchdog");
    Ok(pid)
}

/// Outcome of a watchdog run.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogOutcome {
    /// The pipeline drained (or was replaced) before its deadline.
    Drained,
    /// The deadline passed; participants were terminated.
    Faulted(FaultRecord),
}

/// Body of the detached watchdog process.
///
/// Sleeps until the deadline of `pipeline_id`, waking at least every second
/// to notice the pipeline draining early.
pub fn run_watchdog(ctx: &ProjectContext, pipeline_id: &str, grace: Duration) -> Result<WatchdogOutcome> {
    loop {
        let record = match read_record(ctx)? {
            Some(record) if record.pipeline_id == pipeline_id => record,
            _ => {
                debug!(pipeline = %pipeline_id, "pipeline drained; watchdog exiting");
                return Ok(WatchdogOutcome::Drained);
            }
        };

        if record.is_expired() {
            return fault(ctx, &record, grace).map(WatchdogOutcome::Faulted);
        }

        thread::sleep(record.remaining().min(WATCHDOG_TICK));
    }
}

/// Declare a pipeline timeout fault.
///
/// Terminates every queued process and the lock holder (each with its
/// whole process tree), then deletes the project's lock state.
pub fn fault(ctx: &ProjectContext, record: &DeadlineRecord, grace: Duration) -> Result<FaultRecord> {
    let mut victims: Vec<u32> = queue::list(ctx)?.iter().map(|e| e.pid()).collect();
    if let Ok(Some(holder)) = lock::current_holder(ctx)
        && !holder.is_stale()
    {
        victims.push(holder.pid());
    }
    victims.sort_unstable();
    victims.dedup();
    victims.retain(|&pid| pid != std::process::id());

    let marker = FaultRecord {
        pipeline_id: record.pipeline_id.clone(),
        at: Utc::now(),
        limit_secs: record.limit_secs,
        terminated: victims.clone(),
    };
    write_json(ctx.fault_path(), &marker)?;

    warn!(
        pipeline = %record.pipeline_id,
        limit_secs = record.limit_secs,
        victims = ?victims,
        "pipeline deadline exceeded; terminating all participants"
    );

    thread::scope(|scope| {
        for &pid in &victims {
            scope.spawn(move || process::terminate(pid, grace));
        }
    });

    clear_state(ctx)?;
    Ok(marker)
}

/// Delete every piece of shared lock state except audit trails and the
/// fault marker.
pub fn clear_state(ctx: &ProjectContext) -> Result<()> {
    with_section(&ctx.state_lock_path(), || {
        for path in [
            ctx.lock_path(),
            ctx.queue_path(),
            ctx.owner_path(),
            ctx.deadline_path(),
        ] {
            remove_if_exists(&path)?;
        }
        clear_dir(&ctx.edges_dir())
    })
}

fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SchedError::io("read directory", dir, e)),
    };
    for entry in entries.flatten() {
        remove_if_exists(entry.path())?;
    }
    Ok(())
}
