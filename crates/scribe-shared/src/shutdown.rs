//! Shutdown signal handling shared by the server and worker binaries.

use tokio::signal;
use tracing::info;

/// Wait until the process receives Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
