//! The front door: enqueue, wait, admit, execute, release.
//!
//! One [`Scheduler::run`] call drives a single invocation through
//! [`SchedulerState`]: it joins the admission queue (and the pipeline),
//! polls for the execution lock while running deadlock, deadline and
//! interrupt checks, executes the command once admitted with the memory
//! monitor attached, and releases everything through [`ExitCleanup`] on
//! every exit path.
//!
//! Deadlock detection and the pipeline deadline are optional layers over
//! the same flow, switched by configuration.

mod cleanup;
mod execute;
mod state;

#[cfg(test)]
mod tests;

pub use execute::{ExecutionRecord, display_command};
pub use state::SchedulerState;

use crate::config::Config;
use crate::context::ProjectContext;
use crate::deadline::{self, DeadlineRecord};
use crate::deadlock;
use crate::error::{Result, SchedError};
use crate::fs::{with_section, write_json};
use crate::lock::{self, AcquireOptions, LockRecord};
use crate::memory::{MemoryMonitor, MemoryViolation};
use crate::precheck;
use crate::process::OwnerIdentity;
use crate::queue::{self, QueueEntry};
use crate::reaper::Reaper;
use crate::signals::SignalTrap;
use chrono::Utc;
use cleanup::ExitCleanup;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll cycles between "still waiting" log lines.
const WAIT_REPORT_EVERY: u32 = 30;

/// What happened to an invocation that reached its command.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code to report for the invocation.
    pub exit_code: i32,
    /// Time spent waiting for the lock.
    pub waited: Duration,
    /// Time the command ran.
    pub ran: Duration,
    /// Members of the command's tree killed for exceeding the memory limit.
    pub memory_violations: Vec<MemoryViolation>,
}

/// Scheduler for one invocation in one project.
pub struct Scheduler {
    ctx: ProjectContext,
    config: Config,
    reaper: Reaper,
    owner: OwnerIdentity,
    state: SchedulerState,
    pipeline_id: Option<String>,
}

impl Scheduler {
    pub fn new(ctx: ProjectContext, config: Config) -> Result<Self> {
        let reaper = Reaper::new(&config)?;
        Ok(Self {
            ctx,
            config,
            reaper,
            owner: OwnerIdentity::current(),
            state: SchedulerState::Idle,
            pipeline_id: None,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run `argv` under the project's execution lock.
    ///
    /// Returns the command's outcome, or the scheduler error that prevented
    /// or stopped it. An interruption caused by a pipeline fault is reported
    /// as `PipelineDeadlineExceeded`.
    pub fn run(&mut self, argv: &[String], trap: &SignalTrap) -> Result<RunOutcome> {
        self.ctx.ensure_state_dir()?;
        self.reaper.sweep(&self.ctx);

        let mut cleanup = ExitCleanup::new(self.ctx.clone(), self.owner);
        let result = self.admit_and_execute(argv, trap, &mut cleanup);
        cleanup.finish();
        self.enter(SchedulerState::Released);
        self.reaper.sweep(&self.ctx);

        match result {
            Ok(mut outcome) => {
                if self.faulted() {
                    outcome.exit_code = crate::exit_codes::PIPELINE_DEADLINE;
                }
                Ok(outcome)
            }
            Err(SchedError::Interrupted { .. }) if self.faulted() => {
                Err(self.fault_error())
            }
            Err(e) => Err(e),
        }
    }

    fn admit_and_execute(
        &mut self,
        argv: &[String],
        trap: &SignalTrap,
        cleanup: &mut ExitCleanup,
    ) -> Result<RunOutcome> {
        let display = display_command(argv);
        let arrived = Instant::now();

        let admission = self.join(&display)?;
        if let Some(record) = admission {
            self.watch(&record);
        }

        self.enter(SchedulerState::Waiting);
        let guard = self.wait_for_lock(&display, trap)?;
        cleanup.hold(guard);
        let waited = arrived.elapsed();

        self.enter(SchedulerState::Admitted);
        if let Err(e) = deadlock::clear_edge(&self.ctx, self.owner.pid) {
            warn!(error = %e, "failed to clear dependency edge");
        }
        // A fault or interrupt may land while the lock changes hands.
        trap.check()?;
        self.check_deadline()?;
        let command = display.as_str();
        info!(waited_ms = waited.as_millis() as u64, command = %command, "admitted");

        self.execute(argv, &display, trap, waited)
    }

    /// Enqueue and join (or start) the pipeline, as one step.
    ///
    /// Returns the deadline record when this invocation must start a
    /// watchdog for it.
    fn join(&mut self, display: &str) -> Result<Option<DeadlineRecord>> {
        let entry = QueueEntry::new(self.owner, display);
        let limit = self.config.pipeline_timeout();

        let Some(limit) = limit else {
            queue::enqueue(&self.ctx, &entry)?;
            self.enter(SchedulerState::Enqueued);
            return Ok(None);
        };

        let admission = with_section(&self.ctx.state_lock_path(), || {
            queue::enqueue_locked(&self.ctx, &entry)?;
            deadline::admit_locked(&self.ctx, limit)
        })?;
        self.enter(SchedulerState::Enqueued);

        self.pipeline_id = Some(admission.record().pipeline_id.clone());
        Ok(admission
            .needs_watchdog()
            .then(|| admission.record().clone()))
    }

    /// Start the pipeline watchdog. Its failure never stops the command.
    fn watch(&self, record: &DeadlineRecord) {
        match deadline::spawn_watchdog(&self.ctx, record, self.config.grace_period()) {
            Ok(pid) => debug!(pid, "pipeline watchdog running"),
            Err(e) => warn!(error = %e, "pipeline deadline will not be enforced"),
        }
    }

    fn wait_for_lock(&mut self, display: &str, trap: &SignalTrap) -> Result<lock::LockGuard> {
        let record = LockRecord::for_owner(self.owner, display);
        let options = AcquireOptions {
            timeout: self.config.timeout(),
            poll_interval: self.config.poll_interval(),
        };

        let me = self.owner.pid;
        let ctx = self.ctx.clone();
        let detect = self.config.deadlock_detection;
        let detect_every = self.config.deadlock_check_every.max(1);
        let reap_every = self.config.reap_every.max(1);
        let reaper = self.reaper.clone();
        let pipeline_id = self.pipeline_id.clone();

        let mut polls: u32 = 0;
        let mut blocked_on: Option<u32> = None;

        lock::acquire(&self.ctx, &record, options, |holder| {
            polls = polls.wrapping_add(1);
            trap.check()?;
            if let Some(id) = &pipeline_id {
                deadline::check(&ctx, id)?;
            }

            if detect {
                if blocked_on != Some(holder.pid()) {
                    deadlock::record_edge(&ctx, me, holder.pid())?;
                    blocked_on = Some(holder.pid());
                }
                if (detect_every == 1 || polls % detect_every == 1)
                    && let Some(cycle) = deadlock::detect(&ctx, me)?
                {
                    return Err(SchedError::Deadlock { cycle });
                }
            }

            if polls % reap_every == 0 {
                reaper.sweep(&ctx);
            }

            if polls == 1 || polls % WAIT_REPORT_EVERY == 0 {
                let position = queue::position(&ctx, me).ok().flatten();
                info!(
                    holder = holder.pid(),
                    holder_command = %holder.command,
                    held_for = %holder.age_string(),
                    position = ?position,
                    "waiting for execution lock"
                );
            }
            Ok(())
        })
    }

    fn execute(
        &mut self,
        argv: &[String],
        display: &str,
        trap: &SignalTrap,
        waited: Duration,
    ) -> Result<RunOutcome> {
        let env = precheck::prepare(
            &execute::command_words(argv),
            &self.ctx.project_root,
            self.config.build_jobs,
        )?;
        let mut command = execute::build_command(argv, &env, None)?;

        let mut record = ExecutionRecord {
            pid: self.owner.pid,
            child_pid: None,
            command: display.to_string(),
            started_at: Utc::now(),
            pipeline_id: self.pipeline_id.clone(),
        };
        write_json(self.ctx.owner_path(), &record)?;

        self.enter(SchedulerState::Executing);
        let started = Instant::now();
        let mut child = execute::spawn(&mut command, display)?;
        let child_pid = child.id();
        trap.set_child(child_pid);

        record.child_pid = Some(child_pid);
        if let Err(e) = write_json(self.ctx.owner_path(), &record) {
            warn!(error = %e, "failed to update execution record");
        }

        let monitor = self.config.memory_limit_bytes().map(|limit| {
            MemoryMonitor::spawn(
                child_pid,
                limit,
                self.config.check_interval(),
                self.config.grace_period(),
            )
        });

        let status = child.wait();
        trap.clear_child();
        let memory_violations = monitor.map(MemoryMonitor::stop).unwrap_or_default();
        let status = status.map_err(|e| {
            SchedError::Process(format!("failed to wait for '{}': {}", display, e))
        })?;
        let ran = started.elapsed();

        let exit_code = match trap.interrupted() {
            Some(signal) if status.success() => crate::exit_codes::from_signal(signal),
            _ => execute::exit_code_of(status),
        };
        debug!(exit_code, ran_ms = ran.as_millis() as u64, "command finished");

        Ok(RunOutcome {
            exit_code,
            waited,
            ran,
            memory_violations,
        })
    }

    fn check_deadline(&self) -> Result<()> {
        match &self.pipeline_id {
            Some(id) => deadline::check(&self.ctx, id),
            None => Ok(()),
        }
    }

    /// Whether this invocation's pipeline was ended by a timeout fault.
    fn faulted(&self) -> bool {
        self.pipeline_id
            .as_deref()
            .is_some_and(|id| deadline::fault_for(&self.ctx, id).is_some())
    }

    fn fault_error(&self) -> SchedError {
        match self.check_deadline() {
            Err(e) => e,
            Ok(()) => SchedError::PipelineDeadlineExceeded {
                elapsed: Duration::ZERO,
                limit: Duration::ZERO,
            },
        }
    }

    fn enter(&mut self, next: SchedulerState) {
        if !self.state.can_enter(next) {
            warn!(from = %self.state, to = %next, "unexpected scheduler transition");
        }
        debug!(from = %self.state, to = %next, "scheduler state");
        self.state = next;
    }
}
