//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the restore token. The running stage stops at its next
//! suspension point; an engine that is already up is still shut down and
//! waited for before the restore returns.

use crate::utils::errors::Result;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Bridges process signals to a restore's cancellation token
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token cancelled once a shutdown signal arrives
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGTERM or SIGINT, then cancel the token.
    ///
    /// Returns early without cancelling if the token is cancelled elsewhere.
    pub async fn wait_for_signal(&self) -> Result<()> {
        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), cancelling restore");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling restore");
            }
            _ = self.token.cancelled() => return Ok(()),
        }

        self.token.cancel();
        Ok(())
    }

    /// Run `wait_for_signal` in the background
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.wait_for_signal().await {
                error!(error = %e, "Failed to install signal handlers");
                warn!("Restore can only be stopped by killing the process");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_cancel_ends_listener() {
        let token = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(token.clone());
        let handle = coordinator.clone().spawn();

        token.cancel();

        handle.await.unwrap();
        assert!(coordinator.token().is_cancelled());
    }
}
