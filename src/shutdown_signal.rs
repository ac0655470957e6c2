use tokio::signal;
use tracing::{error, info};

// Resolves on Ctrl-C or SIGTERM. In-flight downloads are then allowed to
// finish at their paced rate before the server exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// Same signal for the TLS server, which is stopped through its handle.
pub async fn shutdown_handle(handle: axum_server::Handle) {
    shutdown_signal().await;
    // No deadline, matching the plain HTTP server.
    handle.graceful_shutdown(None);
}
