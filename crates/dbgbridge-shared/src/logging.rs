//! Subscriber setup shared by the extension and the CLI.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (EnvFilter syntax).
pub const LOG_ENV: &str = "DBGBRIDGE_LOG";

/// Install the stderr subscriber. Safe to call more than once.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
