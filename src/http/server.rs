//! HTTP server bound to an overlay listener.
//!
//! # Responsibilities
//! - Accept overlay connections until shutdown
//! - Optionally terminate TLS before HTTP
//! - Serve HTTP/1.1 with upgrades through an Axum router
//! - Enforce read, write and idle timeouts
//! - Drain in-flight connections within a grace period on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::ConnectInfo, http::Request, Router};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::TimeoutConfig;
use crate::net::idle::{Activity, ActivityIo};
use crate::net::TlsTerminator;
use crate::overlay::{BoxedListener, BoxedStream};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Timeout policy shared by the plain and TLS servers.
#[derive(Debug, Clone, Copy)]
pub struct ServerTimeouts {
    /// TLS handshake and request header read.
    pub read: Duration,
    /// Producing a response.
    pub write: Duration,
    /// No I/O on a connection.
    pub idle: Duration,
    /// In-flight drain on shutdown.
    pub shutdown_grace: Duration,
}

impl From<&TimeoutConfig> for ServerTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            read: config.read(),
            write: config.write(),
            idle: config.idle(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// One HTTP or HTTPS server.
pub struct HttpServer {
    name: &'static str,
    router: Router,
    timeouts: ServerTimeouts,
    tls: Option<TlsTerminator>,
}

impl HttpServer {
    /// Create a server named `name` ("http", "https") for logging.
    pub fn new(name: &'static str, router: Router, timeouts: ServerTimeouts) -> Self {
        let router = Self::build_router(router, &timeouts);
        Self {
            name,
            router,
            timeouts,
            tls: None,
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, tls: TlsTerminator) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Wrap the handler router with the shared middleware stack.
    #[allow(deprecated)]
    fn build_router(router: Router, timeouts: &ServerTimeouts) -> Router {
        router
            .layer(TimeoutLayer::new(timeouts.write))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    ///
    /// Shutdown never fails: connections still open after the grace period
    /// are closed and the overrun is logged.
    pub async fn run(self, mut listener: BoxedListener, shutdown: CancellationToken) {
        let local_addr = listener.local_addr().ok();
        tracing::info!(server = self.name, address = ?local_addr, "HTTP server starting");

        let shared = Arc::new(ConnectionContext {
            name: self.name,
            router: self.router,
            timeouts: self.timeouts,
            tls: self.tls,
        });
        let connections = TaskTracker::new();
        let force_close = CancellationToken::new();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    let shutdown = shutdown.clone();
                    let force_close = force_close.clone();
                    connections.spawn(async move {
                        shared.serve(stream, peer, shutdown, force_close).await;
                    });
                }
                Err(_) if shutdown.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(server = self.name, error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        drop(listener);
        connections.close();
        tracing::info!(
            server = self.name,
            in_flight = connections.len(),
            "HTTP server shutting down"
        );

        let grace = shared.timeouts.shutdown_grace;
        if tokio::time::timeout(grace, connections.wait()).await.is_err() {
            tracing::warn!(
                server = self.name,
                remaining = connections.len(),
                grace = ?grace,
                "HTTP server shutdown timed out, closing remaining connections"
            );
            force_close.cancel();
            connections.wait().await;
        }

        tracing::info!(server = self.name, "HTTP server stopped");
    }
}

struct ConnectionContext {
    name: &'static str,
    router: Router,
    timeouts: ServerTimeouts,
    tls: Option<TlsTerminator>,
}

impl ConnectionContext {
    async fn serve(
        &self,
        stream: BoxedStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
        force_close: CancellationToken,
    ) {
        let stream: BoxedStream = match &self.tls {
            Some(tls) => {
                let handshake = tokio::select! {
                    _ = force_close.cancelled() => return,
                    handshake = tokio::time::timeout(self.timeouts.read, tls.accept(stream)) => handshake,
                };
                match handshake {
                    Ok(Ok((tls_stream, server_name))) => {
                        tracing::trace!(peer_addr = %peer, server_name = %server_name, "TLS handshake complete");
                        Box::new(tls_stream)
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(server = self.name, peer_addr = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!(server = self.name, peer_addr = %peer, "TLS handshake timed out");
                        return;
                    }
                }
            }
            None => stream,
        };

        let activity = Activity::new();
        let io = TokioIo::new(ActivityIo::new(stream, activity.clone()));

        let service = ServiceBuilder::new()
            .map_request(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                request
            })
            .service(self.router.clone());
        let service = TowerToHyperService::new(service);

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.timeouts.read)
            .keep_alive(true);

        let connection = builder.serve_connection(io, service).with_upgrades();
        tokio::pin!(connection);

        let mut draining = false;
        loop {
            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(server = self.name, peer_addr = %peer, error = %e, "Connection error");
                    }
                    break;
                }
                _ = shutdown.cancelled(), if !draining => {
                    draining = true;
                    connection.as_mut().graceful_shutdown();
                }
                _ = activity.idle_for(self.timeouts.idle) => {
                    tracing::debug!(server = self.name, peer_addr = %peer, "Closing idle connection");
                    break;
                }
                _ = force_close.cancelled() => break,
            }
        }
    }
}
