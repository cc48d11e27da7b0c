//! Implementation of the `onelane clear` command.

use super::load_project;
use crate::cli::ClearArgs;
use crate::deadline;
use crate::error::{Result, SchedError};
use crate::exit_codes;
use crate::fs::remove_if_exists;
use crate::lock;
use tracing::warn;

/// Execute the `onelane clear` command.
///
/// Deletes the lock, queue, execution record, pipeline deadline, fault
/// marker and dependency edges. Refuses while a live process holds the lock
/// unless `--force` is given. Processes are never signalled.
pub fn cmd_clear(args: ClearArgs, verbose: bool) -> Result<i32> {
    let (ctx, _config) = load_project(verbose)?;

    if let Ok(Some(holder)) = lock::current_holder(&ctx)
        && !holder.is_stale()
    {
        if !args.force {
            return Err(SchedError::UserError(format!(
                "execution lock is held by live PID {} ({}) for {}\n\
                 Fix: wait for it to finish, or re-run with --force to clear anyway.",
                holder.pid(),
                holder.command,
                holder.age_string()
            )));
        }
        warn!(pid = holder.pid(), "clearing state while the holder is still running");
    }

    if let Some(previous) = lock::force_clear(&ctx)? {
        println!(
            "Removed execution lock of PID {} ({})",
            previous.pid(),
            previous.command
        );
    }
    deadline::clear_state(&ctx)?;
    remove_if_exists(ctx.fault_path())?;

    println!("Cleared scheduling state in {}", ctx.state_dir.display());
    Ok(exit_codes::SUCCESS)
}
