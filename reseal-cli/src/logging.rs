//! Subscriber setup for the binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a filter directive for reseal's own logs.
pub const LOG_ENV: &str = "RESEAL_LOG";

/// Installs a stderr subscriber. `RESEAL_LOG` wins over `RUST_LOG`; without
/// either the level is `warn`, or `debug` when `verbose` is set.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
