//! # Scribe Worker Server
//!
//! Standalone worker process: consumes the task queue, runs the STT and
//! SUMMARY handlers, relays the outbox, and listens for cancellations.
//!
//! ```bash
//! cargo run --bin scribe-worker
//! SCRIBE__STT__PROVIDER=http SCRIBE__STT__BASE_URL=... cargo run --bin scribe-worker
//! ```

use tracing::{error, info};

use scribe_shared::config::ScribeConfig;
use scribe_shared::logging;
use scribe_shared::shutdown::shutdown_signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_tracing();

    info!("Starting Scribe Worker...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ScribeConfig::load()?;
    let shutdown_timeout = config.worker.shutdown_timeout();

    let handle = scribe_worker::bootstrap::bootstrap(config)
        .await
        .map_err(|e| format!("failed to bootstrap worker: {e}"))?;

    info!("Scribe Worker started; press Ctrl+C to shut down gracefully");

    shutdown_signal().await;

    info!("Shutdown signal received, stopping worker...");
    match tokio::time::timeout(shutdown_timeout, handle.stop()).await {
        Ok(()) => info!("Worker stopped"),
        Err(_) => error!(
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "graceful shutdown timed out, forcing exit"
        ),
    }

    Ok(())
}
