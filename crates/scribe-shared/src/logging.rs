//! Tracing initialization shared by the server and worker binaries.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Filtering comes from `RUST_LOG` (default `info`). Setting
/// `SCRIBE_LOG_FORMAT=json` switches to newline-delimited JSON output for
/// log shippers. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("SCRIBE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .ok();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .ok();
    }
}
