//! Project and state-directory resolution for onelane.
//!
//! Every invocation resolves the project it belongs to (the enclosing Git
//! work tree, or the working directory outside of Git) and derives a private
//! state directory from a hash of the project's canonical root path. Two
//! unrelated projects on the same host therefore never share a lock.
//!
//! # State layout
//!
//! ```text
//! <lock_base_dir>/<hash>/
//!   lock.json        Lock Record (exclusive create)
//!   queue.ndjson     Admission Queue, one entry per line
//!   owner.json       command currently executing
//!   deadline.json    Pipeline Deadline Record
//!   fault.json       marker left by the last pipeline timeout fault
//!   edges/<pid>.json dependency edge for each waiter
//!   orphans.ndjson   orphan reaper audit trail
//!   state.lock       advisory lock serializing shared-state mutations
//!   deadlock.lock    advisory lock serializing graph walks
//!   project          project root path, for humans
//! ```

use crate::config::Config;
use crate::error::{Result, SchedError};
use sha2::{Digest, Sha256};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Number of hex characters of the path hash used as directory name.
const HASH_LEN: usize = 16;

/// Resolved paths for one project's scheduler state.
///
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Canonical project root.
    pub project_root: PathBuf,

    /// Per-project state directory (`<lock_base_dir>/<hash>`).
    pub state_dir: PathBuf,
}

impl ProjectContext {
    /// Build the context for a known project root.
    pub fn for_root(project_root: &Path, config: &Config) -> Self {
        let base = config
            .lock_base_dir
            .clone()
            .unwrap_or_else(default_base_dir);

        Self {
            project_root: project_root.to_path_buf(),
            state_dir: base.join(project_hash(project_root)),
        }
    }

    /// Build a context around an existing state directory.
    ///
    /// Used by the detached watchdog, which is handed the directory directly.
    pub fn for_state_dir(state_dir: PathBuf) -> Self {
        let project_root = std::fs::read_to_string(state_dir.join("project"))
            .map(|s| PathBuf::from(s.trim()))
            .unwrap_or_else(|_| state_dir.clone());

        Self {
            project_root,
            state_dir,
        }
    }

    /// Create the state directory (and the `edges/` subdirectory) if missing.
    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(self.edges_dir())
            .map_err(|e| SchedError::io("create state directory", &self.state_dir, e))?;

        let marker = self.state_dir.join("project");
        if !marker.exists() {
            std::fs::write(&marker, self.project_root.to_string_lossy().as_bytes())
                .map_err(|e| SchedError::io("write", &marker, e))?;
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("lock.json")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join("queue.ndjson")
    }

    pub fn owner_path(&self) -> PathBuf {
        self.state_dir.join("owner.json")
    }

    pub fn deadline_path(&self) -> PathBuf {
        self.state_dir.join("deadline.json")
    }

    pub fn fault_path(&self) -> PathBuf {
        self.state_dir.join("fault.json")
    }

    pub fn edges_dir(&self) -> PathBuf {
        self.state_dir.join("edges")
    }

    /// Dependency edge file owned by `waiter`.
    pub fn edge_path(&self, waiter: u32) -> PathBuf {
        self.edges_dir().join(format!("{}.json", waiter))
    }

    pub fn orphan_log_path(&self) -> PathBuf {
        self.state_dir.join("orphans.ndjson")
    }

    pub fn state_lock_path(&self) -> PathBuf {
        self.state_dir.join("state.lock")
    }

    pub fn deadlock_lock_path(&self) -> PathBuf {
        self.state_dir.join("deadlock.lock")
    }
}

/// Stable directory name for a project root: truncated hex SHA-256 of the
/// root path.
pub fn project_hash(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.to_string_lossy().as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    hash
}

/// Default storage root: `$XDG_RUNTIME_DIR/onelane`, else a per-user
/// directory under the system temp dir.
pub fn default_base_dir() -> PathBuf {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("onelane"),
        _ => env::temp_dir().join(format!("onelane-{}", nix::unistd::getuid())),
    }
}

/// Find the project root for `cwd`.
///
/// Uses the enclosing Git work tree when there is one, otherwise the
/// canonical working directory itself.
pub fn find_project_root(cwd: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .current_dir(cwd)
        .args(["rev-parse", "--show-toplevel"])
        .output();

    if let Ok(output) = output
        && output.status.success()
    {
        let toplevel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !toplevel.is_empty() {
            let path = PathBuf::from(toplevel);
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    cwd.canonicalize()
        .map_err(|e| SchedError::io("resolve project directory", cwd, e))
}
