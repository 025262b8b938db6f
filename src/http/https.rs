//! HTTPS edge for one service: redirect on 80, TLS reverse proxy on 443.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{ServiceMapping, TimeoutConfig};
use crate::http::proxy::{proxy_router, ProxyState};
use crate::http::redirect::redirect_router;
use crate::http::server::{HttpServer, ServerTimeouts};
use crate::net::TlsTerminator;
use crate::overlay::{BoxedListener, OverlayError, Protocol, SharedNode};

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

#[derive(Debug, Error)]
pub enum HttpsError {
    #[error("failed to start {scheme} listener on port {port}: {source}")]
    Listen {
        scheme: &'static str,
        port: u16,
        #[source]
        source: OverlayError,
    },

    #[error("invalid proxy target {target}: {reason}")]
    Target { target: String, reason: String },
}

/// Bound plain and TLS listeners of one service, ready to serve.
pub struct HttpsProxy {
    http_listener: BoxedListener,
    https_listener: BoxedListener,
    redirect: HttpServer,
    proxy: HttpServer,
    upgrades: TaskTracker,
    timeouts: ServerTimeouts,
    target: String,
    hostname: String,
}

impl HttpsProxy {
    /// Bind ports 80 and 443 on `node` and prepare both servers.
    ///
    /// `shutdown` also ends upgraded (tunnelled) connections.
    pub async fn bind(
        node: SharedNode,
        mapping: &ServiceMapping,
        timeouts: &TimeoutConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self, HttpsError> {
        let upgrades = TaskTracker::new();
        let state = ProxyState::new(mapping, timeouts.dial(), upgrades.clone(), shutdown.clone())
            .map_err(|e| HttpsError::Target {
                target: mapping.target(),
                reason: e.to_string(),
            })?;

        let http_listener = node
            .listen(Protocol::Tcp, HTTP_PORT)
            .await
            .map_err(|source| HttpsError::Listen {
                scheme: "HTTP",
                port: HTTP_PORT,
                source,
            })?;
        let https_listener = node
            .listen(Protocol::Tcp, HTTPS_PORT)
            .await
            .map_err(|source| HttpsError::Listen {
                scheme: "HTTPS",
                port: HTTPS_PORT,
                source,
            })?;

        let timeouts = ServerTimeouts::from(timeouts);
        let hostname = node.hostname().to_string();
        let redirect = HttpServer::new("http", redirect_router(&hostname), timeouts);
        let proxy = HttpServer::new("https", proxy_router(state), timeouts)
            .with_tls(TlsTerminator::new(node));

        Ok(Self {
            http_listener,
            https_listener,
            redirect,
            proxy,
            upgrades,
            timeouts,
            target: mapping.target_url(),
            hostname,
        })
    }

    /// Address of the plain (redirect) listener.
    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    /// Address of the TLS (proxy) listener.
    pub fn https_addr(&self) -> io::Result<SocketAddr> {
        self.https_listener.local_addr()
    }

    /// Serve both listeners until `shutdown`, then drain within the grace
    /// period. Always completes; drain problems are only logged.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            https_url = %format!("https://{}/", self.hostname),
            target = %self.target,
            "HTTPS proxy started"
        );

        tokio::join!(
            self.redirect.run(self.http_listener, shutdown.clone()),
            self.proxy.run(self.https_listener, shutdown.clone()),
        );

        self.upgrades.close();
        if tokio::time::timeout(self.timeouts.shutdown_grace, self.upgrades.wait())
            .await
            .is_err()
        {
            tracing::error!(
                remaining = self.upgrades.len(),
                "Upgraded connections did not close within the grace period"
            );
        }

        tracing::info!("HTTPS proxy servers stopped");
    }
}
