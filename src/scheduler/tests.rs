//! Tests for the front door.
//!
//! These run the scheduler in-process with the test process as the owner.
//! The pipeline deadline is disabled here because its watchdog re-executes
//! the current binary; it is covered by the integration tests.

use super::*;
use crate::context::ProjectContext;
use crate::exit_codes;
use crate::fs::read_json;
use crate::test_support::{LiveProcess, dead_pid, test_config};
use serial_test::serial;
use std::thread;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    ctx: ProjectContext,
    config: Config,
    trap: SignalTrap,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        pipeline_timeout_secs: 0,
        orphan_signatures: Vec::new(),
        deadlock_check_every: 1,
        ..test_config(temp_dir.path())
    };
    let ctx = ProjectContext::for_root(&temp_dir.path().join("project"), &config);
    std::fs::create_dir_all(&ctx.project_root).unwrap();
    ctx.ensure_state_dir().unwrap();

    Fixture {
        _temp_dir: temp_dir,
        ctx,
        config,
        trap: SignalTrap::install(Duration::from_millis(200)).unwrap(),
    }
}

fn argv(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn run(fx: &Fixture, config: Config, words: &[&str]) -> (Scheduler, Result<RunOutcome>) {
    let mut scheduler = Scheduler::new(fx.ctx.clone(), config).unwrap();
    let result = scheduler.run(&argv(words), &fx.trap);
    (scheduler, result)
}

fn assert_clean(ctx: &ProjectContext) {
    assert!(!ctx.lock_path().exists(), "lock left behind");
    assert!(!ctx.owner_path().exists(), "execution record left behind");
    assert!(queue::read_entries(ctx).unwrap().is_empty(), "queue entry left behind");
    assert!(!ctx.edge_path(std::process::id()).exists(), "edge left behind");
}

fn plant_holder(ctx: &ProjectContext, pid: u32) {
    write_json(
        ctx.lock_path(),
        &LockRecord::for_owner(OwnerIdentity::of(pid), "outer"),
    )
    .unwrap();
}

#[test]
#[serial]
fn test_run_success_cleans_up() {
    let fx = fixture();
    let (scheduler, result) = run(&fx, fx.config.clone(), &["true"]);

    let outcome = result.unwrap();
    assert_eq!(outcome.exit_code, exit_codes::SUCCESS);
    assert!(outcome.memory_violations.is_empty());
    assert_eq!(scheduler.state(), SchedulerState::Released);
    assert_clean(&fx.ctx);
}

#[test]
#[serial]
fn test_command_exit_code_passes_through() {
    let fx = fixture();
    let (_, result) = run(&fx, fx.config.clone(), &["exit 7"]);
    assert_eq!(result.unwrap().exit_code, 7);
    assert_clean(&fx.ctx);
}

#[test]
#[serial]
fn test_execution_record_visible_while_running() {
    let fx = fixture();
    let owner = fx.ctx.owner_path();
    let script = format!("test -s '{}'", owner.display());

    let (_, result) = run(&fx, fx.config.clone(), &[script.as_str()]);
    assert_eq!(result.unwrap().exit_code, 0);
    assert!(read_json::<_, ExecutionRecord>(&owner).unwrap().is_none());
}

#[test]
#[serial]
fn test_waits_for_live_holder() {
    let fx = fixture();
    let holder = LiveProcess::spawn();
    plant_holder(&fx.ctx, holder.pid());

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        drop(holder);
    });

    let (_, result) = run(&fx, fx.config.clone(), &["true"]);
    releaser.join().unwrap();

    let outcome = result.unwrap();
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.waited >= Duration::from_millis(300));
    assert_clean(&fx.ctx);
}

#[test]
#[serial]
fn test_stale_holder_does_not_block() {
    let fx = fixture();
    plant_holder(&fx.ctx, dead_pid());

    let (_, result) = run(&fx, fx.config.clone(), &["true"]);
    let outcome = result.unwrap();
    assert!(outcome.waited < Duration::from_secs(1));
    assert_clean(&fx.ctx);
}

#[test]
#[serial]
fn test_contention_timeout() {
    let fx = fixture();
    let holder = LiveProcess::spawn();
    plant_holder(&fx.ctx, holder.pid());

    let config = Config {
        timeout_secs: 1,
        ..fx.config.clone()
    };
    let (scheduler, result) = run(&fx, config, &["true"]);

    let err = result.unwrap_err();
    assert!(matches!(err, SchedError::ContentionTimeout { .. }));
    assert_eq!(err.exit_code(), exit_codes::LOCK_TIMEOUT);
    assert_eq!(scheduler.state(), SchedulerState::Released);

    // The holder's lock is untouched; our queue entry and edge are gone.
    assert_eq!(lock::current_holder(&fx.ctx).unwrap().unwrap().pid(), holder.pid());
    assert!(queue::read_entries(&fx.ctx).unwrap().is_empty());
    assert!(!fx.ctx.edge_path(std::process::id()).exists());
}

#[test]
#[serial]
fn test_waiting_on_own_ancestor_is_a_deadlock() {
    let fx = fixture();
    let parent = std::os::unix::process::parent_id();
    plant_holder(&fx.ctx, parent);

    let (_, result) = run(&fx, fx.config.clone(), &["true"]);

    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::DEADLOCK);
    match err {
        SchedError::Deadlock { cycle } => {
            assert_eq!(cycle, vec![std::process::id(), parent, std::process::id()])
        }
        other => panic!("expected deadlock, got {:?}", other),
    }
    assert!(!fx.ctx.edge_path(std::process::id()).exists());
    assert!(queue::read_entries(&fx.ctx).unwrap().is_empty());
}

#[test]
#[serial]
fn test_deadlock_detection_can_be_disabled() {
    let fx = fixture();
    let parent = std::os::unix::process::parent_id();
    plant_holder(&fx.ctx, parent);

    let config = Config {
        deadlock_detection: false,
        timeout_secs: 1,
        ..fx.config.clone()
    };
    let (_, result) = run(&fx, config, &["true"]);
    assert!(matches!(result, Err(SchedError::ContentionTimeout { .. })));
}

#[test]
#[serial]
fn test_missing_program_is_user_error_and_cleans_up() {
    let fx = fixture();
    let (_, result) = run(&fx, fx.config.clone(), &["/nonexistent/onelane-tool", "x"]);

    assert_eq!(result.unwrap_err().exit_code(), exit_codes::USER_ERROR);
    assert_clean(&fx.ctx);
}

#[test]
#[serial]
fn test_expired_pipeline_fails_fast() {
    let fx = fixture();
    let mut record = DeadlineRecord::new(Duration::from_secs(1));
    record.started_at = Utc::now() - chrono::Duration::seconds(10);
    write_json(fx.ctx.deadline_path(), &record).unwrap();

    let config = Config {
        pipeline_timeout_secs: 1,
        ..fx.config.clone()
    };
    let (scheduler, result) = run(&fx, config, &["true"]);

    let err = result.unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::PIPELINE_DEADLINE);
    assert_eq!(scheduler.state(), SchedulerState::Released);
    assert!(queue::read_entries(&fx.ctx).unwrap().is_empty());
}
