//! Diagnostic logging to stderr.
//!
//! `RUST_LOG` wins when set. Otherwise onelane logs warnings only, or
//! everything down to debug when verbose.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "onelane=debug" } else { "onelane=warn" }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "onelane=debug");
        assert_eq!(default_directive(false), "onelane=warn");
    }
}
