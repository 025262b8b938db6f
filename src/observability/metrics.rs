//! Metrics collection and exposition.
//!
//! # Metrics
//! - `forwarder_connections_total` (counter): accepted TCP connections by service
//! - `forwarder_active_connections` (gauge): open TCP connections by service
//! - `forwarder_dial_failures_total` (counter): backend dial failures by service
//! - `forwarder_bytes_total` (counter): forwarded bytes by service, direction
//! - `https_requests_total` (counter): proxied requests by service, status
//! - `https_request_duration_seconds` (histogram): proxy latency by service
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(service: &str) {
    counter!("forwarder_connections_total", "service" => service.to_string()).increment(1);
    gauge!("forwarder_active_connections", "service" => service.to_string()).increment(1.0);
}

pub fn record_connection_closed(service: &str) {
    gauge!("forwarder_active_connections", "service" => service.to_string()).decrement(1.0);
}

pub fn record_dial_failure(service: &str) {
    counter!("forwarder_dial_failures_total", "service" => service.to_string()).increment(1);
}

pub fn record_bytes(service: &str, direction: &'static str, bytes: u64) {
    counter!(
        "forwarder_bytes_total",
        "service" => service.to_string(),
        "direction" => direction
    )
    .increment(bytes);
}

pub fn record_https_request(service: &str, status: u16, start: Instant) {
    counter!(
        "https_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("https_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}
