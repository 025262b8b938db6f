//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::mapping::ServiceMapping;

/// Root configuration for the forwarder.
///
/// Built once at startup and handed to the supervisor by value.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Overlay network identity and HTTPS settings.
    pub overlay: OverlayConfig,

    /// Service mappings, one runner each.
    pub services: Vec<ServiceMapping>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Overlay network settings shared by every service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Base hostname; each service joins as `{service}.{hostname}`, sanitized.
    pub hostname: String,

    /// Pre-authorized key used to register node identities.
    pub auth_key: String,

    /// Base directory for per-service node state.
    pub state_dir: Option<PathBuf>,

    /// Terminate TLS on 443 and redirect 80 for every service.
    pub enable_https: bool,

    /// Additional provider arguments, space separated, double quotes group.
    pub extra_args: String,

    /// Host address the local provider binds listeners on.
    pub bind_address: String,

    /// Directory holding `{server_name}.crt` / `{server_name}.key` PEM files.
    /// Defaults to `{state_dir}/certs`.
    pub cert_dir: Option<PathBuf>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            auth_key: String::new(),
            state_dir: None,
            enable_https: false,
            extra_args: String::new(),
            bind_address: "0.0.0.0".to_string(),
            cert_dir: None,
        }
    }
}

impl OverlayConfig {
    /// Directory certificates are read from, if any.
    pub fn cert_dir(&self) -> Option<PathBuf> {
        self.cert_dir
            .clone()
            .or_else(|| self.state_dir.as_ref().map(|dir| dir.join("certs")))
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend dial timeout in seconds.
    pub dial_secs: u64,

    /// TLS handshake and request header read timeout in seconds.
    pub read_secs: u64,

    /// Response production timeout in seconds.
    pub write_secs: u64,

    /// Idle HTTP connection timeout in seconds.
    pub idle_secs: u64,

    /// Grace period for in-flight HTTP requests on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_secs: 30,
            read_secs: 30,
            write_secs: 30,
            idle_secs: 120,
            shutdown_grace_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format: "text" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
