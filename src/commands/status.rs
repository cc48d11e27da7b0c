//! Implementation of the `onelane status` command.

use super::load_project;
use crate::cli::StatusArgs;
use crate::error::Result;
use crate::exit_codes;
use crate::status::StatusSnapshot;

/// Execute the `onelane status` command.
///
/// Read-only: prints the snapshot as text or JSON.
pub fn cmd_status(args: StatusArgs, verbose: bool) -> Result<i32> {
    let (ctx, config) = load_project(verbose)?;
    let snapshot = StatusSnapshot::collect(&ctx, config.audit_keep)?;

    if args.json {
        println!("{}", snapshot.to_json()?);
    } else {
        print!("{}", snapshot.render());
    }
    Ok(exit_codes::SUCCESS)
}
