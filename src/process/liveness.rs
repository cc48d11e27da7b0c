//! Liveness and staleness checks for recorded owners.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// Identity of a process that owns a piece of shared state.
///
/// The start time guards against PID reuse: a live process that reuses a
/// dead owner's PID does not inherit its claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerIdentity {
    pub pid: u32,

    /// Process start time in seconds since the epoch, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

impl OwnerIdentity {
    /// Identity of the calling process.
    pub fn current() -> Self {
        Self::of(std::process::id())
    }

    /// Identity of an arbitrary process, capturing its start time now.
    pub fn of(pid: u32) -> Self {
        Self {
            pid,
            started_at: process_start_time(pid),
        }
    }

    /// Whether the owner is still running.
    ///
    /// A claim is stale when its PID is gone, is a zombie, or now belongs to
    /// a process started at a different time.
    pub fn is_live(&self) -> bool {
        if !is_alive(self.pid) {
            return false;
        }
        match (self.started_at, process_start_time(self.pid)) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }
}

/// Whether `pid` names a running (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

/// Start time of `pid` in seconds since the epoch.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(pid)
        .map(|p| p.start_time())
        .filter(|&t| t > 0)
}

fn is_zombie(pid: u32) -> bool {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    matches!(
        system.process(pid).map(|p| p.status()),
        Some(ProcessStatus::Zombie | ProcessStatus::Dead)
    )
}
