//! TLS termination with certificates fetched from the overlay node.
//!
//! The ClientHello is read first so the certificate can be looked up by the
//! requested server name before the handshake continues.

use std::io;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::overlay::{OverlayError, SharedNode};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] io::Error),

    #[error("client did not send a server name")]
    MissingServerName,

    #[error(transparent)]
    Certificate(#[from] OverlayError),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Accepts TLS connections for one overlay node.
#[derive(Clone)]
pub struct TlsTerminator {
    node: SharedNode,
    provider: Arc<CryptoProvider>,
}

impl TlsTerminator {
    pub fn new(node: SharedNode) -> Self {
        Self {
            node,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Run the server side of a handshake on `io`.
    ///
    /// Returns the decrypted stream and the server name the client asked for.
    pub async fn accept<IO>(&self, io: IO) -> Result<(TlsStream<IO>, String), TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(Acceptor::default(), io).await?;

        let server_name = start
            .client_hello()
            .server_name()
            .map(str::to_owned)
            .ok_or(TlsError::MissingServerName)?;

        let key = self.node.certificate(&server_name).await?;
        let config = self.server_config(key)?;

        let stream = start.into_stream(config).await?;
        Ok((stream, server_name))
    }

    fn server_config(&self, key: Arc<CertifiedKey>) -> Result<Arc<ServerConfig>, rustls::Error> {
        let mut config = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(FixedCert(key)));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

/// Resolver answering every handshake with an already selected certificate.
#[derive(Debug)]
struct FixedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCert {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}
