//! Overlay provider backed by host sockets.
//!
//! Every identity shares the host network: listeners bind
//! `{bind_address}:{port}` and certificates are read from PEM files named
//! after the requested server name. Useful when the forwarder already runs
//! inside the overlay (sidecar, subnet router) or for local development.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use tokio::net::TcpListener;

use crate::config::OverlayConfig;
use crate::overlay::{
    BoxedListener, BoxedStream, Identity, OverlayError, OverlayListener, OverlayNode,
    OverlayProvider, Protocol, SharedNode,
};

/// Provider that binds host sockets for every identity.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    bind_address: IpAddr,
    cert_dir: Option<PathBuf>,
}

impl LocalProvider {
    pub fn new(bind_address: IpAddr, cert_dir: Option<PathBuf>) -> Self {
        Self {
            bind_address,
            cert_dir,
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Result<Self, OverlayError> {
        let bind_address = config
            .bind_address
            .parse()
            .map_err(|e| OverlayError::Join {
                hostname: config.hostname.clone(),
                reason: format!("invalid bind address {:?}: {}", config.bind_address, e),
            })?;
        Ok(Self::new(bind_address, config.cert_dir()))
    }
}

#[async_trait]
impl OverlayProvider for LocalProvider {
    async fn join(&self, identity: &Identity) -> Result<SharedNode, OverlayError> {
        if let Some(dir) = &identity.state_dir {
            create_state_dir(dir).await.map_err(|e| OverlayError::Join {
                hostname: identity.hostname.clone(),
                reason: format!("failed to create state directory {}: {}", dir.display(), e),
            })?;
        }

        tracing::debug!(
            hostname = %identity.hostname,
            bind_address = %self.bind_address,
            extra_args = ?identity.extra_args,
            "Local overlay node joined"
        );

        Ok(Arc::new(LocalNode {
            hostname: identity.hostname.clone(),
            bind_address: self.bind_address,
            cert_dir: self.cert_dir.clone(),
            certs: DashMap::new(),
            closed: AtomicBool::new(false),
        }))
    }
}

async fn create_state_dir(dir: &Path) -> io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}

struct LocalNode {
    hostname: String,
    bind_address: IpAddr,
    cert_dir: Option<PathBuf>,
    certs: DashMap<String, Arc<CertifiedKey>>,
    closed: AtomicBool,
}

impl LocalNode {
    async fn load_certificate(&self, server_name: &str) -> Result<CertifiedKey, String> {
        let dir = self
            .cert_dir
            .as_ref()
            .ok_or_else(|| "no certificate directory configured".to_string())?;

        let cert_pem = tokio::fs::read(dir.join(format!("{}.crt", server_name)))
            .await
            .map_err(|e| format!("failed to read certificate: {}", e))?;
        let key_pem = tokio::fs::read(dir.join(format!("{}.key", server_name)))
            .await
            .map_err(|e| format!("failed to read private key: {}", e))?;

        parse_certified_key(&cert_pem, &key_pem)
    }
}

/// Build a signing-ready certificate from PEM encoded chain and key.
pub fn parse_certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, String> {
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid certificate PEM: {}", e))?;
    if chain.is_empty() {
        return Err("certificate file contains no certificates".to_string());
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| format!("invalid private key PEM: {}", e))?
        .ok_or_else(|| "key file contains no private key".to_string())?;

    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| format!("unsupported private key: {}", e))?;

    Ok(CertifiedKey::new(chain, signing_key))
}

/// Server names double as file names, so only hostname characters pass.
fn is_valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[async_trait]
impl OverlayNode for LocalNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn listen(&self, protocol: Protocol, port: u16) -> Result<BoxedListener, OverlayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OverlayError::Closed(self.hostname.clone()));
        }
        if protocol != Protocol::Tcp {
            return Err(OverlayError::UnsupportedProtocol(protocol));
        }

        let addr = SocketAddr::new(self.bind_address, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| OverlayError::Listen {
                protocol,
                port,
                source,
            })?;

        Ok(Box::new(LocalListener { inner: listener }))
    }

    async fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, OverlayError> {
        if !is_valid_server_name(server_name) {
            return Err(OverlayError::Certificate {
                server_name: server_name.to_string(),
                reason: "invalid server name".to_string(),
            });
        }

        if let Some(cached) = self.certs.get(server_name) {
            return Ok(Arc::clone(cached.value()));
        }

        let key = self
            .load_certificate(server_name)
            .await
            .map_err(|reason| OverlayError::Certificate {
                server_name: server_name.to_string(),
                reason,
            })?;

        let key = Arc::new(key);
        self.certs.insert(server_name.to_string(), Arc::clone(&key));
        Ok(key)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.certs.clear();
            tracing::debug!(hostname = %self.hostname, "Local overlay node closed");
        }
    }
}

struct LocalListener {
    inner: TcpListener,
}

#[async_trait]
impl OverlayListener for LocalListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
