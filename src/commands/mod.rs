//! Command implementations for onelane.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every handler returns the process exit code on success;
//! errors carry their own code through [`SchedError::exit_code`].
//!
//! [`SchedError::exit_code`]: crate::error::SchedError::exit_code

mod clear;
mod reap;
mod run;
mod status;
mod watchdog;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::context::{ProjectContext, find_project_root};
use crate::error::{Result, SchedError};
use crate::logging;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let verbose = cli.verbose;
    match cli.command {
        Command::Run(args) => run::cmd_run(args, verbose),
        Command::Status(args) => status::cmd_status(args, verbose),
        Command::Reap => reap::cmd_reap(verbose),
        Command::Clear(args) => clear::cmd_clear(args, verbose),
        Command::Watchdog(args) => watchdog::cmd_watchdog(args, verbose),
    }
}

/// Resolve the project of the working directory and its effective config,
/// then start logging.
fn load_project(verbose: bool) -> Result<(ProjectContext, Config)> {
    let cwd = std::env::current_dir().map_err(|e| {
        SchedError::UserError(format!("failed to get current working directory: {}", e))
    })?;
    let project_root = find_project_root(&cwd)?;
    let config = Config::resolve(&project_root)?;
    logging::init(verbose || config.verbose);

    let ctx = ProjectContext::for_root(&project_root, &config);
    Ok((ctx, config))
}
