//! Service runner: one overlay identity, its TCP forwarder and optional
//! HTTPS proxy.
//!
//! # Lifecycle
//! ```text
//! join ─▶ bind TCP source port ─▶ bind 80/443 (HTTPS on) ─▶ ready
//!     ─▶ startup barrier ─▶ serve until cancelled ─▶ drain ─▶ close node
//! ```
//! Join and bind failures are returned; everything after the barrier only
//! logs. A panic after joining is caught and reported as
//! [`ServiceError::Panicked`]. The node is closed exactly once on every path
//! that joined, panics included.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ServiceMapping, TimeoutConfig};
use crate::http::{HttpsError, HttpsProxy};
use crate::lifecycle::startup::StartupBarrier;
use crate::overlay::{Identity, OverlayError, OverlayProvider, SharedNode};
use crate::tcp::TcpForwarder;

/// Fatal failure of one service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service {service}: {source}")]
    Join {
        service: String,
        #[source]
        source: OverlayError,
    },

    #[error("service {service}: failed to start TCP forwarder on port {port}: {source}")]
    Listen {
        service: String,
        port: u16,
        #[source]
        source: OverlayError,
    },

    #[error("service {service}: {source}")]
    Https {
        service: String,
        #[source]
        source: HttpsError,
    },

    #[error("service {service} panicked")]
    Panicked { service: String },
}

/// Runs one service mapping to completion.
pub struct ServiceRunner {
    mapping: ServiceMapping,
    identity: Identity,
    enable_https: bool,
    timeouts: TimeoutConfig,
    provider: Arc<dyn OverlayProvider>,
    barrier: StartupBarrier,
}

struct Bound {
    tcp: TcpForwarder,
    https: Option<HttpsProxy>,
}

impl ServiceRunner {
    pub fn new(
        mapping: ServiceMapping,
        identity: Identity,
        enable_https: bool,
        timeouts: TimeoutConfig,
        provider: Arc<dyn OverlayProvider>,
        barrier: StartupBarrier,
    ) -> Self {
        Self {
            mapping,
            identity,
            enable_https,
            timeouts,
            provider,
            barrier,
        }
    }

    /// Run until `shutdown` is cancelled or startup fails.
    ///
    /// Cancellation at any point is a clean exit.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let mut joined: Option<SharedNode> = None;
        let outcome = AssertUnwindSafe(self.start(&shutdown, &mut joined))
            .catch_unwind()
            .await;

        if let Some(node) = joined {
            node.close().await;
            tracing::info!(hostname = %node.hostname(), "Overlay node closed");
        }

        outcome.unwrap_or_else(|panic| {
            tracing::error!(panic = panic_message(panic.as_ref()), "Service panicked");
            Err(ServiceError::Panicked {
                service: self.mapping.name.clone(),
            })
        })
    }

    async fn start(
        &self,
        shutdown: &CancellationToken,
        joined: &mut Option<SharedNode>,
    ) -> Result<(), ServiceError> {
        tracing::info!(
            hostname = %self.identity.hostname,
            source_port = self.mapping.source_port,
            target = %self.mapping.target(),
            https = self.enable_https,
            "Joining overlay network"
        );

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!("Cancelled before joining overlay network");
                return Ok(());
            }
            result = self.provider.join(&self.identity) => result,
        };
        let node = result.map_err(|source| ServiceError::Join {
            service: self.mapping.name.clone(),
            source,
        })?;

        let node = joined.insert(node);
        self.serve(node, shutdown).await
    }

    async fn serve(&self, node: &SharedNode, shutdown: &CancellationToken) -> Result<(), ServiceError> {
        let Bound { tcp, https } = self.bind(node, shutdown).await?;

        tracing::info!(
            hostname = %node.hostname(),
            tcp_address = ?tcp.local_addr().ok(),
            http_address = ?https.as_ref().and_then(|h| h.http_addr().ok()),
            https_address = ?https.as_ref().and_then(|h| h.https_addr().ok()),
            "Service ready"
        );

        self.barrier.arrive();
        if !self.barrier.wait(shutdown).await {
            tracing::info!("Cancelled before startup completed, closing listeners");
            return Ok(());
        }

        match https {
            Some(https) => {
                tokio::join!(tcp.run(shutdown.clone()), https.run(shutdown.clone()));
            }
            None => tcp.run(shutdown.clone()).await,
        }

        tracing::info!("Service stopped");
        Ok(())
    }

    async fn bind(&self, node: &SharedNode, shutdown: &CancellationToken) -> Result<Bound, ServiceError> {
        let tcp = TcpForwarder::bind(node.as_ref(), &self.mapping, self.timeouts.dial())
            .await
            .map_err(|source| ServiceError::Listen {
                service: self.mapping.name.clone(),
                port: self.mapping.source_port,
                source,
            })?;

        let https = if self.enable_https {
            let proxy = HttpsProxy::bind(Arc::clone(node), &self.mapping, &self.timeouts, shutdown)
                .await
                .map_err(|source| ServiceError::Https {
                    service: self.mapping.name.clone(),
                    source,
                })?;
            Some(proxy)
        } else {
            None
        };

        Ok(Bound { tcp, https })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
