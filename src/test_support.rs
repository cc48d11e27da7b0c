use crate::config::Config;
use crate::context::ProjectContext;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;

/// A project context whose state lives in a fresh temporary directory.
pub(crate) fn test_context() -> (TempDir, ProjectContext) {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let ctx = ProjectContext::for_root(&temp_dir.path().join("project"), &config);
    ctx.ensure_state_dir().unwrap();
    (temp_dir, ctx)
}

/// Default config with fast polling, storing state under `base`.
pub(crate) fn test_config(base: &Path) -> Config {
    Config {
        lock_base_dir: Some(base.join("state")),
        poll_interval_ms: 50,
        grace_period_ms: 200,
        check_interval_secs: 1,
        ..Config::default()
    }
}

/// PID of a process that has already exited and been reaped.
pub(crate) fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// A long-running process standing in for another live participant.
///
/// Killed and reaped on drop.
pub(crate) struct LiveProcess {
    child: Child,
}

impl LiveProcess {
    pub(crate) fn spawn() -> Self {
        let child = Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        Self { child }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
