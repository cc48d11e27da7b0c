//! CLI argument parsing for onelane.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use crate::config::parse_duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// onelane: run commands one at a time, project-wide.
///
/// Every command started through `onelane run` in the same project waits for
/// a single execution lock, so test runs, builds and version-control
/// operations never overlap. Crashed holders are detected and their lock
/// reclaimed automatically.
#[derive(Parser, Debug)]
#[command(name = "onelane")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log scheduling decisions to stderr (same as VERBOSE=1).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for onelane.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command once the project's execution lock is free.
    ///
    /// A single argument is run through `sh -c`; several arguments are
    /// executed directly. The command's exit code is passed through.
    Run(RunArgs),

    /// Show the lock holder, the queue, the pipeline deadline and recently
    /// reaped orphans.
    Status(StatusArgs),

    /// Terminate orphaned test runners now.
    Reap,

    /// Delete all scheduling state for this project.
    Clear(ClearArgs),

    /// Enforce a pipeline deadline (started internally).
    #[command(hide = true)]
    Watchdog(WatchdogArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Give up waiting for the lock after this long (e.g. 90, 30s, 10m; 0 waits forever).
    #[arg(long, value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,

    /// Deadline for the whole chain of queued commands (0 disables).
    #[arg(long, value_parser = parse_duration_arg)]
    pub pipeline_timeout: Option<Duration>,

    /// Per-process resident memory ceiling in MiB (0 disables).
    #[arg(long)]
    pub memory_limit_mb: Option<u64>,

    /// The command to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Clear even while a live process holds the lock.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct WatchdogArgs {
    #[arg(long)]
    pub state_dir: PathBuf,

    #[arg(long)]
    pub pipeline_id: String,

    #[arg(long, default_value_t = 2000)]
    pub grace_ms: u64,
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration '{}'", raw))
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_separator() {
        let cli = Cli::try_parse_from(["onelane", "run", "--", "cargo", "test", "--all"]).unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.command, vec!["cargo", "test", "--all"]);
            assert!(args.timeout.is_none());
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::try_parse_from([
            "onelane",
            "run",
            "--timeout",
            "30s",
            "--pipeline-timeout",
            "2h",
            "--memory-limit-mb",
            "512",
            "make test",
        ])
        .unwrap();
        if let Command::Run(args) = cli.command {
            assert_eq!(args.timeout, Some(Duration::from_secs(30)));
            assert_eq!(args.pipeline_timeout, Some(Duration::from_secs(7200)));
            assert_eq!(args.memory_limit_mb, Some(512));
            assert_eq!(args.command, vec!["make test"]);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_run_requires_command() {
        assert!(Cli::try_parse_from(["onelane", "run"]).is_err());
    }

    #[test]
    fn parse_run_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["onelane", "run", "--timeout", "soon", "true"]).is_err());
    }

    #[test]
    fn parse_status_json() {
        let cli = Cli::try_parse_from(["onelane", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status(StatusArgs { json: true })));
    }

    #[test]
    fn parse_clear_force() {
        let cli = Cli::try_parse_from(["onelane", "clear", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::Clear(ClearArgs { force: true })));
    }

    #[test]
    fn parse_global_verbose() {
        let cli = Cli::try_parse_from(["onelane", "reap", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Reap));
    }

    #[test]
    fn parse_watchdog() {
        let cli = Cli::try_parse_from([
            "onelane",
            "watchdog",
            "--state-dir",
            "/tmp/x",
            "--pipeline-id",
            "p1",
        ])
        .unwrap();
        if let Command::Watchdog(args) = cli.command {
            assert_eq!(args.state_dir, PathBuf::from("/tmp/x"));
            assert_eq!(args.pipeline_id, "p1");
            assert_eq!(args.grace_ms, 2000);
        } else {
            panic!("Expected Watchdog command");
        }
    }
}
