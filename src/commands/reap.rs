//! Implementation of the `onelane reap` command.

use super::load_project;
use crate::error::Result;
use crate::exit_codes;
use crate::reaper::Reaper;

/// Execute the `onelane reap` command: one orphan sweep, reported.
pub fn cmd_reap(verbose: bool) -> Result<i32> {
    let (ctx, config) = load_project(verbose)?;
    let reaped = Reaper::new(&config)?.sweep(&ctx);

    if reaped.is_empty() {
        println!("No orphaned processes found.");
    }
    for record in &reaped {
        println!(
            "Reaped PID {}{}: {}",
            record.pid,
            if record.forced { " (killed)" } else { "" },
            record.cmdline
        );
    }
    Ok(exit_codes::SUCCESS)
}
