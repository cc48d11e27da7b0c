//! onelane: project-wide mutual exclusion of command execution.
//!
//! This is the main entry point for the `onelane` CLI. It parses arguments,
//! dispatches to the appropriate command handler, and turns the outcome into
//! the process exit code.

mod cli;
mod commands;
pub mod config;
pub mod context;
pub mod deadline;
pub mod deadlock;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod lock;
pub mod logging;
pub mod memory;
pub mod precheck;
pub mod process;
pub mod queue;
pub mod reaper;
pub mod scheduler;
pub mod signals;
pub mod status;

#[cfg(test)]
mod test_support;

use cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match commands::dispatch(cli) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("onelane: {}", err);

            ExitCode::from(err.exit_code().clamp(0, 255) as u8)
        }
    }
}
