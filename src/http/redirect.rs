//! Plain HTTP listener handler: permanent redirect to the TLS listener.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};

/// Router that answers every request with `301` to the `https` URL.
///
/// `fallback_host` is used when the request carries no host at all.
pub fn redirect_router(fallback_host: &str) -> Router {
    Router::new()
        .fallback(redirect_handler)
        .with_state(Arc::<str>::from(fallback_host))
}

async fn redirect_handler(State(fallback_host): State<Arc<str>>, request: Request<Body>) -> Response {
    let location = https_location(&request, &fallback_host);
    tracing::debug!(
        method = %request.method(),
        path = %request.uri().path(),
        location = %location,
        "Redirecting to HTTPS"
    );
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// `https://{host}{path?query}` for the request.
pub fn https_location<B>(request: &Request<B>, fallback_host: &str) -> String {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or(fallback_host);

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("https://{}{}", host, path)
}
