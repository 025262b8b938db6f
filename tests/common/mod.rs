//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, Uri},
    Router,
};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::sign::CertifiedKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::{client::TlsStream, TlsConnector};

use overlay_forwarder::config::{ForwarderConfig, ServiceMapping};
use overlay_forwarder::overlay::local::parse_certified_key;
use overlay_forwarder::overlay::{
    BoxedListener, BoxedStream, Identity, OverlayError, OverlayListener, OverlayNode,
    OverlayProvider, Protocol, SharedNode,
};

/// Base hostname used by every test configuration.
pub const BASE_HOSTNAME: &str = "edge.test";

/// Overlay hostname a service named `service` joins as.
pub fn hostname_of(service: &str) -> String {
    format!("{}-edge-test", service)
}

/// Configuration with short timeouts suitable for tests.
pub fn test_config(services: Vec<ServiceMapping>, enable_https: bool) -> ForwarderConfig {
    let mut config = ForwarderConfig::default();
    config.overlay.hostname = BASE_HOSTNAME.to_string();
    config.overlay.auth_key = "tskey-test".to_string();
    config.overlay.enable_https = enable_https;
    config.services = services;
    config.timeouts.dial_secs = 2;
    config.timeouts.read_secs = 5;
    config.timeouts.write_secs = 5;
    config.timeouts.idle_secs = 10;
    config.timeouts.shutdown_grace_secs = 2;
    config
}

/// Start a backend that echoes every byte until the client closes.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    });

    addr
}

/// Start an HTTP backend that describes each request it receives:
///
/// ```text
/// {method} {uri}
/// host={host}
/// xff={x-forwarded-for}
/// xfp={x-forwarded-proto}
/// xfh={x-forwarded-host}
/// rid={x-request-id}
/// {body}
/// ```
///
/// Paths of the form `/sleep/{ms}` answer after waiting `ms` milliseconds.
pub async fn start_http_backend() -> SocketAddr {
    async fn describe(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> String {
        if let Some(ms) = uri.path().strip_prefix("/sleep/").and_then(|ms| ms.parse::<u64>().ok()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string()
        };
        format!(
            "{} {}\nhost={}\nxff={}\nxfp={}\nxfh={}\nrid={}\n{}",
            method,
            uri,
            header("host"),
            header("x-forwarded-for"),
            header("x-forwarded-proto"),
            header("x-forwarded-host"),
            header("x-request-id"),
            String::from_utf8_lossy(&body)
        )
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(describe);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that accepts any HTTP upgrade with `101 Switching
/// Protocols` and then echoes the upgraded stream.
pub async fn start_upgrade_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_none() {
                    return;
                }
                let response = "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n";
                if socket.write_all(response.as_bytes()).await.is_err() {
                    return;
                }
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Read up to and including the blank line that ends an HTTP head.
pub async fn read_head<S>(stream: &mut S) -> Option<String>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return None,
        }
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Self-signed certificate for `names`, as a server key and the DER to trust.
pub fn self_signed(names: &[&str]) -> (Arc<CertifiedKey>, CertificateDer<'static>) {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(names).unwrap();
    let key = parse_certified_key(cert.pem().as_bytes(), key_pair.serialize_pem().as_bytes()).unwrap();
    (Arc::new(key), cert.der().clone())
}

/// Open a TLS connection to `addr` presenting `server_name` as SNI.
pub async fn tls_connect(
    addr: SocketAddr,
    server_name: &str,
    root: CertificateDer<'static>,
) -> io::Result<TlsStream<TcpStream>> {
    let config = client_config(root)?;
    connect_with(config, addr, server_name).await
}

/// Like [`tls_connect`], but the ClientHello carries no SNI extension.
/// `server_name` is still used to verify the certificate.
pub async fn tls_connect_without_sni(
    addr: SocketAddr,
    server_name: &str,
    root: CertificateDer<'static>,
) -> io::Result<TlsStream<TcpStream>> {
    let mut config = client_config(root)?;
    config.enable_sni = false;
    connect_with(config, addr, server_name).await
}

fn client_config(root: CertificateDer<'static>) -> io::Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(root).map_err(io::Error::other)?;

    Ok(rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(io::Error::other)?
    .with_root_certificates(roots)
    .with_no_client_auth())
}

async fn connect_with(
    config: rustls::ClientConfig,
    addr: SocketAddr,
    server_name: &str,
) -> io::Result<TlsStream<TcpStream>> {
    let name = ServerName::try_from(server_name.to_string()).map_err(io::Error::other)?;
    let tcp = TcpStream::connect(addr).await?;
    TlsConnector::from(Arc::new(config)).connect(name, tcp).await
}

/// Send a raw HTTP/1.1 request with `Connection: close` and return the full
/// response text.
pub async fn raw_http<S>(mut stream: S, request_head: &str) -> String
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(request_head.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => panic!("read failed: {}", e),
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

/// Poll `check` until it returns `Some` or five seconds pass.
pub async fn eventually<T, F>(mut check: F) -> T
where
    F: FnMut() -> Option<T>,
{
    for _ in 0..500 {
        if let Some(value) = check() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

#[derive(Default)]
struct ProviderState {
    joins: AtomicUsize,
    closes: AtomicUsize,
    bound: Mutex<HashMap<(String, u16), SocketAddr>>,
    failing: Mutex<HashSet<(String, u16)>>,
    panicking: Mutex<HashSet<(String, u16)>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    certificate: Mutex<Option<Arc<CertifiedKey>>>,
}

/// Overlay provider for tests.
///
/// Every requested port is served from an ephemeral loopback port; tests look
/// the real address up with [`TestProvider::addr`].
#[derive(Clone, Default)]
pub struct TestProvider {
    state: Arc<ProviderState>,
}

impl TestProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `listen(port)` fail for `hostname`.
    pub fn fail_listen(&self, hostname: &str, port: u16) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert((hostname.to_string(), port));
    }

    /// Make `listen(port)` panic for `hostname`.
    pub fn panic_listen(&self, hostname: &str, port: u16) {
        self.state
            .panicking
            .lock()
            .unwrap()
            .insert((hostname.to_string(), port));
    }

    /// Block joins of `hostname` until the returned handle is notified.
    pub fn hold_join(&self, hostname: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .held
            .lock()
            .unwrap()
            .insert(hostname.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn set_certificate(&self, key: Arc<CertifiedKey>) {
        *self.state.certificate.lock().unwrap() = Some(key);
    }

    pub fn joins(&self) -> usize {
        self.state.joins.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Address `hostname` listens on for overlay `port`, if bound.
    pub fn bound(&self, hostname: &str, port: u16) -> Option<SocketAddr> {
        self.state
            .bound
            .lock()
            .unwrap()
            .get(&(hostname.to_string(), port))
            .copied()
    }

    /// Wait until `hostname` has bound overlay `port`.
    pub async fn addr(&self, hostname: &str, port: u16) -> SocketAddr {
        eventually(|| self.bound(hostname, port)).await
    }
}

#[async_trait]
impl OverlayProvider for TestProvider {
    async fn join(&self, identity: &Identity) -> Result<SharedNode, OverlayError> {
        self.state.joins.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.held.lock().unwrap().get(&identity.hostname).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(Arc::new(TestNode {
            hostname: identity.hostname.clone(),
            state: Arc::clone(&self.state),
            closed: AtomicUsize::new(0),
        }))
    }
}

struct TestNode {
    hostname: String,
    state: Arc<ProviderState>,
    closed: AtomicUsize,
}

#[async_trait]
impl OverlayNode for TestNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn listen(&self, protocol: Protocol, port: u16) -> Result<BoxedListener, OverlayError> {
        let key = (self.hostname.clone(), port);
        if self.state.panicking.lock().unwrap().contains(&key) {
            panic!("listen on {}:{} panicked", self.hostname, port);
        }
        let failing = self.state.failing.lock().unwrap().contains(&key);
        if failing {
            return Err(OverlayError::Listen {
                protocol,
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "injected bind failure"),
            });
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|source| OverlayError::Listen { protocol, port, source })?;
        let addr = listener.local_addr().unwrap();
        self.state.bound.lock().unwrap().insert(key, addr);
        Ok(Box::new(TestListener { listener }))
    }

    async fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, OverlayError> {
        self.state
            .certificate
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| OverlayError::Certificate {
                server_name: server_name.to_string(),
                reason: "no test certificate".to_string(),
            })
    }

    async fn close(&self) {
        if self.closed.fetch_add(1, Ordering::SeqCst) == 0 {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct TestListener {
    listener: TcpListener,
}

#[async_trait]
impl OverlayListener for TestListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((Box::new(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
