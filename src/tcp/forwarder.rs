//! TCP forwarder: one overlay listener, one backend.
//!
//! # Responsibilities
//! - Accept overlay connections until shutdown
//! - Dial the backend per connection with a bounded timeout
//! - Pump bytes both ways, isolating per-connection failures
//! - Close active connections and wait for them on shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::ServiceMapping;
use crate::net::pump::{self, is_disconnect};
use crate::net::{ConnectionState, ConnectionTracker};
use crate::observability::metrics;
use crate::overlay::{BoxedListener, BoxedStream, OverlayError, OverlayNode, Protocol};

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Forwards one service's source port to its backend.
pub struct TcpForwarder {
    mapping: Arc<ServiceMapping>,
    listener: BoxedListener,
    dial_timeout: Duration,
    connections: ConnectionTracker,
}

impl TcpForwarder {
    /// Bind the mapping's source port on `node`.
    pub async fn bind(
        node: &dyn OverlayNode,
        mapping: &ServiceMapping,
        dial_timeout: Duration,
    ) -> Result<Self, OverlayError> {
        let listener = node.listen(Protocol::Tcp, mapping.source_port).await?;

        Ok(Self {
            mapping: Arc::new(mapping.clone()),
            listener,
            dial_timeout,
            connections: ConnectionTracker::new(&mapping.name),
        })
    }

    /// Address the overlay listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then close active connections and wait
    /// for every connection task to finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mapping,
            mut listener,
            dial_timeout,
            connections,
        } = self;

        tracing::info!(
            source_port = mapping.source_port,
            target = %mapping.target(),
            "TCP forwarder accepting"
        );

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let mapping = Arc::clone(&mapping);
                    let tracker = connections.clone();
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        forward(stream, peer, &mapping, dial_timeout, &tracker, &shutdown).await;
                    });
                }
                Err(_) if shutdown.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(
                        source_port = mapping.source_port,
                        error = %e,
                        "Failed to accept connection"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        drop(listener);
        tracing::info!(
            active_connections = connections.active_count(),
            "TCP forwarder stopped accepting, closing connections"
        );
        connections.close_and_wait().await;
        tracing::info!(source_port = mapping.source_port, "TCP forwarder closed");
    }
}

/// Dial the backend and pump one accepted connection to completion.
async fn forward(
    source: BoxedStream,
    peer: SocketAddr,
    mapping: &ServiceMapping,
    dial_timeout: Duration,
    tracker: &ConnectionTracker,
    shutdown: &CancellationToken,
) {
    let guard = tracker.track();
    let connection_id = guard.id();
    let target = mapping.target();

    tracing::trace!(
        connection_id = %connection_id,
        peer_addr = %peer,
        state = ?ConnectionState::Dialing,
        "Connection accepted"
    );

    let dialed = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        dialed = tokio::time::timeout(dial_timeout, TcpStream::connect(&target)) => dialed,
    };

    let target_stream = match dialed {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            metrics::record_dial_failure(&mapping.name);
            tracing::error!(
                connection_id = %connection_id,
                source_port = mapping.source_port,
                target = %target,
                error = %e,
                "Failed to dial target"
            );
            return;
        }
        Err(_) => {
            metrics::record_dial_failure(&mapping.name);
            tracing::error!(
                connection_id = %connection_id,
                source_port = mapping.source_port,
                target = %target,
                timeout = ?dial_timeout,
                "Timed out dialing target"
            );
            return;
        }
    };
    let _ = target_stream.set_nodelay(true);

    tracing::debug!(
        connection_id = %connection_id,
        peer_addr = %peer,
        target = %target,
        state = ?ConnectionState::Piping,
        "Forwarding connection"
    );

    let outcome = pump::pump(source, target_stream, tracker, shutdown).await;

    metrics::record_bytes(&mapping.name, outcome.upstream.direction.as_str(), outcome.upstream.bytes);
    metrics::record_bytes(&mapping.name, outcome.downstream.direction.as_str(), outcome.downstream.bytes);

    match outcome.error() {
        Some(e) => tracing::warn!(
            connection_id = %connection_id,
            target = %target,
            error = %e,
            "Failed to forward connection"
        ),
        None => {
            let reset = [&outcome.upstream.result, &outcome.downstream.result]
                .into_iter()
                .any(|r| matches!(r, Err(e) if is_disconnect(e)));
            tracing::debug!(
                connection_id = %connection_id,
                bytes_upstream = outcome.upstream.bytes,
                bytes_downstream = outcome.downstream.bytes,
                reset,
                "Connection finished"
            );
        }
    }
}
