//! Overlay network capability interface.
//!
//! # Data Flow
//! ```text
//! Identity (per service)
//!     → OverlayProvider::join      (network presence, fatal on error)
//!     → OverlayNode::listen        (virtual listener per port, fatal on error)
//!     → OverlayListener::accept    (inbound overlay connections)
//!     → OverlayNode::certificate   (per TLS handshake, keyed by SNI)
//!     → OverlayNode::close         (once per service on shutdown)
//! ```
//!
//! The forwarding engine only sees these traits. `local.rs` provides an
//! implementation backed by host sockets and on-disk certificates.

pub mod identity;
pub mod local;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::sign::CertifiedKey;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use identity::{sanitize_label, Identity};
pub use local::LocalProvider;

/// Transport protocol requested from [`OverlayNode::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// Errors surfaced by an overlay provider.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to join overlay network as {hostname}: {reason}")]
    Join { hostname: String, reason: String },

    #[error("failed to listen on {protocol} port {port}: {source}")]
    Listen {
        protocol: Protocol,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("protocol {0} is not supported by this provider")]
    UnsupportedProtocol(Protocol),

    #[error("no certificate available for {server_name}: {reason}")]
    Certificate { server_name: String, reason: String },

    #[error("overlay node {0} is closed")]
    Closed(String),
}

/// A bidirectional byte stream accepted from the overlay.
pub trait OverlayStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> OverlayStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedStream = Box<dyn OverlayStream>;

/// An accept-capable listener bound on an overlay node.
///
/// Dropping the listener stops accepting.
#[async_trait]
pub trait OverlayListener: Send {
    /// Accept the next inbound connection and its peer address.
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub type BoxedListener = Box<dyn OverlayListener>;

/// A joined overlay identity.
#[async_trait]
pub trait OverlayNode: Send + Sync {
    /// Hostname this node is reachable under.
    fn hostname(&self) -> &str;

    /// Bind a virtual listener on this node.
    async fn listen(&self, protocol: Protocol, port: u16) -> Result<BoxedListener, OverlayError>;

    /// Retrieve the TLS certificate for `server_name`.
    async fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, OverlayError>;

    /// Tear down network presence. Calling it more than once is a no-op.
    async fn close(&self);
}

pub type SharedNode = Arc<dyn OverlayNode>;

/// Factory of overlay nodes, one per service identity.
#[async_trait]
pub trait OverlayProvider: Send + Sync {
    async fn join(&self, identity: &Identity) -> Result<SharedNode, OverlayError>;
}
