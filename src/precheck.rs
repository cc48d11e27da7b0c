//! Command-aware pre-checks run right before an admitted command executes.
//!
//! - Version control: a `.git/index.lock` left by a crashed git process
//!   blocks every later git command. It is removed when no git process is
//!   running on the host.
//! - Build tools: parallelism is capped to `build_jobs` through the tool's
//!   own environment variable, unless the caller already set it.

use crate::error::{Result, SchedError};
use crate::process::ProcessTable;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Build tools with a known environment knob for parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTool {
    Cargo,
    Make,
    CMake,
    Go,
}

impl BuildTool {
    /// Environment variable and value that cap parallelism to `jobs`.
    fn job_cap(self, jobs: usize) -> (&'static str, String) {
        match self {
            BuildTool::Cargo => ("CARGO_BUILD_JOBS", jobs.to_string()),
            BuildTool::Make => ("MAKEFLAGS", format!("-j{}", jobs)),
            BuildTool::CMake => ("CMAKE_BUILD_PARALLEL_LEVEL", jobs.to_string()),
            BuildTool::Go => ("GOFLAGS", format!("-p={}", jobs)),
        }
    }
}

/// What kind of work a command is, for pre-check purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Vcs,
    Build(BuildTool),
    Other,
}

/// Classify a command by its program name.
///
/// Leading `VAR=value` assignments (as in a shell command string) are
/// skipped, and `env` and `nice` wrappers are looked through.
pub fn classify(argv: &[String]) -> CommandKind {
    let program = argv
        .iter()
        .map(String::as_str)
        .filter(|arg| !is_assignment(arg))
        .find(|arg| !matches!(program_name(arg), "env" | "nice" | "time"))
        .map(program_name);

    match program {
        Some("git") => CommandKind::Vcs,
        Some("cargo") => CommandKind::Build(BuildTool::Cargo),
        Some("make" | "gmake") => CommandKind::Build(BuildTool::Make),
        Some("cmake" | "ctest") => CommandKind::Build(BuildTool::CMake),
        Some("go") => CommandKind::Build(BuildTool::Go),
        _ => CommandKind::Other,
    }
}

fn is_assignment(arg: &str) -> bool {
    arg.split_once('=').is_some_and(|(name, _)| {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn program_name(arg: &str) -> &str {
    arg.rsplit('/').next().unwrap_or(arg)
}

/// Environment additions for `kind`, skipping variables `is_set` reports
/// as already present.
pub fn build_env<F>(kind: CommandKind, jobs: usize, is_set: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> bool,
{
    match kind {
        CommandKind::Build(tool) => {
            let (name, value) = tool.job_cap(jobs);
            if is_set(name) {
                debug!(name, "caller set build parallelism; leaving it");
                Vec::new()
            } else {
                vec![(name.to_string(), value)]
            }
        }
        _ => Vec::new(),
    }
}

/// Path of the git index lock for the repository at `project_root`, when
/// the project has a plain `.git` directory.
fn index_lock_path(project_root: &Path) -> Option<PathBuf> {
    let git_dir = project_root.join(".git");
    git_dir.is_dir().then(|| git_dir.join("index.lock"))
}

/// Whether any process in `table` is git.
fn git_running(table: &ProcessTable) -> bool {
    table.entries().any(|e| {
        e.cmdline
            .split_whitespace()
            .next()
            .map(program_name)
            .is_some_and(|name| name == "git")
    })
}

/// Remove a stale `.git/index.lock`.
///
/// Returns whether a lock was removed. A lock is left alone while any git
/// process runs, since it may own it.
pub fn clear_stale_index_lock(project_root: &Path, table: &ProcessTable) -> Result<bool> {
    let Some(lock) = index_lock_path(project_root) else {
        return Ok(false);
    };
    if !lock.exists() {
        return Ok(false);
    }
    if git_running(table) {
        debug!(path = %lock.display(), "git is running; keeping index.lock");
        return Ok(false);
    }

    match std::fs::remove_file(&lock) {
        Ok(()) => {
            warn!(path = %lock.display(), "removed stale git index lock");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SchedError::io("remove", &lock, e)),
    }
}

/// Run the pre-checks for `argv` and return the environment to add to the
/// command.
pub fn prepare(argv: &[String], project_root: &Path, build_jobs: usize) -> Result<Vec<(String, String)>> {
    let kind = classify(argv);
    debug!(?kind, "classified command");

    if kind == CommandKind::Vcs {
        clear_stale_index_lock(project_root, &ProcessTable::capture())?;
    }
    Ok(build_env(kind, build_jobs, |name| std::env::var_os(name).is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessEntry;
    use tempfile::TempDir;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn table(cmdlines: &[&str]) -> ProcessTable {
        ProcessTable::from_entries(cmdlines.iter().enumerate().map(|(i, cmd)| ProcessEntry {
            pid: 100 + i as u32,
            parent: Some(1),
            rss: 0,
            cmdline: cmd.to_string(),
        }))
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&argv(&["git", "commit", "-m", "x"])), CommandKind::Vcs);
        assert_eq!(classify(&argv(&["/usr/bin/git", "status"])), CommandKind::Vcs);
        assert_eq!(
            classify(&argv(&["cargo", "build"])),
            CommandKind::Build(BuildTool::Cargo)
        );
        assert_eq!(
            classify(&argv(&["RUSTFLAGS=-Dwarnings", "env", "make", "all"])),
            CommandKind::Build(BuildTool::Make)
        );
        assert_eq!(classify(&argv(&["pytest", "-q"])), CommandKind::Other);
        assert_eq!(classify(&argv(&[])), CommandKind::Other);
    }

    #[test]
    fn test_build_env_caps_jobs() {
        let env = build_env(CommandKind::Build(BuildTool::Make), 3, |_| false);
        assert_eq!(env, vec![("MAKEFLAGS".to_string(), "-j3".to_string())]);

        let env = build_env(CommandKind::Build(BuildTool::Cargo), 2, |_| false);
        assert_eq!(env, vec![("CARGO_BUILD_JOBS".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_build_env_respects_caller() {
        let env = build_env(CommandKind::Build(BuildTool::Cargo), 2, |name| {
            name == "CARGO_BUILD_JOBS"
        });
        assert!(env.is_empty());
        assert!(build_env(CommandKind::Vcs, 2, |_| false).is_empty());
    }

    #[test]
    fn test_stale_index_lock_removed() {
        let temp_dir = TempDir::new().unwrap();
        let git_dir = temp_dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(git_dir.join("index.lock"), "").unwrap();

        let removed = clear_stale_index_lock(temp_dir.path(), &table(&["vim", "sleep 5"])).unwrap();
        assert!(removed);
        assert!(!git_dir.join("index.lock").exists());
        assert!(!clear_stale_index_lock(temp_dir.path(), &table(&[])).unwrap());
    }

    #[test]
    fn test_index_lock_kept_while_git_runs() {
        let temp_dir = TempDir::new().unwrap();
        let git_dir = temp_dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(git_dir.join("index.lock"), "").unwrap();

        let removed =
            clear_stale_index_lock(temp_dir.path(), &table(&["/usr/bin/git rebase -i"])).unwrap();
        assert!(!removed);
        assert!(git_dir.join("index.lock").exists());
    }

    #[test]
    fn test_no_git_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!clear_stale_index_lock(temp_dir.path(), &table(&[])).unwrap());
    }
}
