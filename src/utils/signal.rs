//! Signal handling for cooperative cancellation.

use tokio_util::sync::CancellationToken;

/// Resolve on SIGINT. Never resolves if the handler cannot be installed.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Wait for a shutdown signal (SIGINT, or SIGTERM on Unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = interrupt() => log::warn!("Signal received: SIGINT"),
                    _ = sigterm.recv() => log::warn!("Signal received: SIGTERM"),
                }
                return;
            }
            Err(e) => log::warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    interrupt().await;
    log::warn!("Signal received: SIGINT");
}

/// Spawn a task that cancels `token` on the first shutdown signal.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}
