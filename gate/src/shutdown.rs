use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared cancellation for every task in the daemon.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignals {
    pub token: CancellationToken,
}

impl ShutdownSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves on Ctrl+C or SIGTERM and cancels the token.
    pub async fn wait_for_signal(&self) {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                error!("Failed to install SIGTERM handler: {err}");
                _ = tokio::signal::ctrl_c().await;
                self.token.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = self.token.cancelled() => {}
        }

        self.token.cancel();
    }
}
