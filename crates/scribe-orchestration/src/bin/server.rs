//! # Scribe API Server
//!
//! Thin wrapper binary for running the task control API, the SSE stream
//! endpoint, and the control-plane background tasks (broadcaster feed,
//! reaper) as a standalone server.
//!
//! ```bash
//! cargo run --bin scribe-server
//! SCRIBE__API__BIND=0.0.0.0:9090 cargo run --bin scribe-server
//! ```

use tracing::{error, info};

use scribe_shared::config::ScribeConfig;
use scribe_shared::logging;
use scribe_shared::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    info!("Starting Scribe API Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ScribeConfig::load()?;
    let shutdown_timeout = config.api.shutdown_timeout();

    let handle = scribe_orchestration::bootstrap::bootstrap(config)
        .await
        .map_err(|e| format!("failed to bootstrap server: {e}"))?;

    info!("Scribe API Server started; press Ctrl+C to shut down gracefully");

    shutdown_signal().await;

    info!("Shutdown signal received, stopping server...");
    match tokio::time::timeout(shutdown_timeout, handle.stop()).await {
        Ok(()) => info!("Server stopped"),
        Err(_) => error!(
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "graceful shutdown timed out, forcing exit"
        ),
    }

    Ok(())
}
