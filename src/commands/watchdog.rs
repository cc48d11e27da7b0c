//! Implementation of the hidden `onelane watchdog` command.
//!
//! Spawned detached by the first participant of a pipeline; never run by
//! hand.

use crate::cli::WatchdogArgs;
use crate::context::ProjectContext;
use crate::deadline::{self, WatchdogOutcome};
use crate::error::Result;
use crate::exit_codes;
use crate::logging;
use std::time::Duration;

/// Execute the `onelane watchdog` command.
pub fn cmd_watchdog(args: WatchdogArgs, verbose: bool) -> Result<i32> {
    logging::init(verbose);

    let ctx = ProjectContext::for_state_dir(args.state_dir);
    let grace = Duration::from_millis(args.grace_ms);

    match deadline::run_watchdog(&ctx, &args.pipeline_id, grace)? {
        WatchdogOutcome::Drained => {}
        WatchdogOutcome::Faulted(fault) => {
            eprintln!(
                "onelane: pipeline exceeded its {}s deadline; terminated {} process(es)",
                fault.limit_secs,
                fault.terminated.len()
            );
        }
    }
    Ok(exit_codes::SUCCESS)
}
