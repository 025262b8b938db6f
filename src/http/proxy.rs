//! TLS listener handler: reverse proxy to the service backend.
//!
//! Requests keep their method, path, query, body and `Host`; hop-by-hop
//! headers are dropped and forwarding headers added. Upgrades (101) are
//! joined into a raw tunnel between client and backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header,
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    Router,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServiceMapping;
use crate::http::headers::{append_forwarded, is_upgrade, strip_hop_by_hop};
use crate::observability::metrics;

/// Shared state of one service's proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    service: Arc<str>,
    target: Authority,
    client: Client<HttpConnector, Body>,
    upgrades: TaskTracker,
    shutdown: CancellationToken,
}

impl ProxyState {
    pub fn new(
        mapping: &ServiceMapping,
        dial_timeout: Duration,
        upgrades: TaskTracker,
        shutdown: CancellationToken,
    ) -> Result<Self, InvalidUri> {
        let target: Authority = mapping.target().parse()?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(dial_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            service: Arc::from(mapping.name.as_str()),
            target,
            client,
            upgrades,
            shutdown,
        })
    }
}

/// Router forwarding every request to the backend.
pub fn proxy_router(state: ProxyState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::info!(
        method = %method,
        path = %path,
        remote_addr = %remote_addr,
        "HTTPS proxy request"
    );

    let client_upgrade = is_upgrade(request.headers()).then(|| hyper::upgrade::on(&mut request));

    let upstream = match upstream_request(request, &state.target, remote_addr) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(method = %method, path = %path, error = %e, "Failed to build upstream request");
            metrics::record_https_request(&state.service, 400, start);
            return (StatusCode::BAD_REQUEST, "Invalid request").into_response();
        }
    };

    let mut response = match state.client.request(upstream).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                method = %method,
                path = %path,
                target = %state.target,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_https_request(&state.service, 502, start);
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    let status = response.status();
    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        "HTTPS proxy response"
    );
    metrics::record_https_request(&state.service, status.as_u16(), start);

    let switching = status == StatusCode::SWITCHING_PROTOCOLS;
    if switching {
        match client_upgrade {
            Some(client_upgrade) => {
                let backend_upgrade = hyper::upgrade::on(&mut response);
                spawn_tunnel(&state, client_upgrade, backend_upgrade);
            }
            None => {
                tracing::warn!(path = %path, "Backend switched protocols without an upgrade request");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
            }
        }
    }

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers, switching);
    Response::from_parts(parts, Body::new(body))
}

/// Rewrite the client request for the backend hop.
fn upstream_request(
    request: Request<Body>,
    target: &Authority,
    remote_addr: SocketAddr,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();
    let upgrade = is_upgrade(&parts.headers);

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));

    let mut uri_parts = parts.uri.into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(target.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = Uri::from_parts(uri_parts)?;

    strip_hop_by_hop(&mut parts.headers, upgrade);
    append_forwarded(&mut parts.headers, remote_addr.ip(), host.as_deref());
    if let Some(host) = host.and_then(|h| header::HeaderValue::from_str(&h).ok()) {
        parts.headers.insert(header::HOST, host);
    }

    Ok(Request::from_parts(parts, body))
}

/// Join both upgraded connections once hyper hands them over.
fn spawn_tunnel(state: &ProxyState, client: OnUpgrade, backend: OnUpgrade) {
    let shutdown = state.shutdown.clone();
    state.upgrades.spawn(async move {
        let (client, backend) = match tokio::try_join!(client, backend) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Upgrade failed");
                return;
            }
        };

        let mut client = TokioIo::new(client);
        let mut backend = TokioIo::new(backend);
        tokio::select! {
            result = tokio::io::copy_bidirectional(&mut client, &mut backend) => match result {
                Ok((up, down)) => tracing::debug!(bytes_upstream = up, bytes_downstream = down, "Upgraded connection closed"),
                Err(e) => tracing::debug!(error = %e, "Upgraded connection failed"),
            },
            _ = shutdown.cancelled() => tracing::debug!("Upgraded connection closed on shutdown"),
        }
    });
}
