//! Shutdown coordination for the forwarder.

use tokio_util::sync::CancellationToken;

use crate::lifecycle::signals::wait_for_shutdown_signal;

/// Coordinator for graceful shutdown.
///
/// Wraps the root cancellation token every long-running task derives from.
/// Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token. Cancelling it stops everything.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the root token on the first OS termination signal.
    ///
    /// If handlers cannot be registered the error is logged and only
    /// programmatic triggers stop the process.
    pub fn trigger_on_signal(&self) -> tokio::task::JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = wait_for_shutdown_signal() => match signal {
                    Ok(name) => {
                        tracing::info!(signal = name, "Shutdown signal received");
                        token.cancel();
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to register signal handlers");
                    }
                },
            }
        })
    }
}
