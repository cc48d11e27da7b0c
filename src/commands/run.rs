//! Implementation of the `onelane run` command.

use super::load_project;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::signals::SignalTrap;
use tracing::debug;

/// Execute the `onelane run` command.
///
/// Returns the supervised command's exit code, or `128 + N` when it was
/// killed by signal N.
pub fn cmd_run(args: RunArgs, verbose: bool) -> Result<i32> {
    let (ctx, config) = load_project(verbose)?;
    let config = apply_overrides(config, &args);

    // Installed before any shared state is touched.
    let trap = SignalTrap::install(config.grace_period())?;

    let mut scheduler = Scheduler::new(ctx, config)?;
    let outcome = scheduler.run(&args.command, &trap)?;
    debug!(
        state = %scheduler.state(),
        waited_ms = outcome.waited.as_millis() as u64,
        ran_ms = outcome.ran.as_millis() as u64,
        exit_code = outcome.exit_code,
        "invocation finished"
    );

    for violation in &outcome.memory_violations {
        eprintln!(
            "onelane: terminated PID {} ({}): {} MiB resident exceeded the {} MiB limit",
            violation.pid,
            violation.cmdline,
            violation.rss / (1024 * 1024),
            violation.limit / (1024 * 1024)
        );
    }

    Ok(outcome.exit_code)
}

/// Per-invocation flags override file and environment settings.
fn apply_overrides(mut config: Config, args: &RunArgs) -> Config {
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout.as_secs();
    }
    if let Some(limit) = args.pipeline_timeout {
        config.pipeline_timeout_secs = limit.as_secs();
    }
    if let Some(limit) = args.memory_limit_mb {
        config.memory_limit_mb = limit;
    }
    config
}
