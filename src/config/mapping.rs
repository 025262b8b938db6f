//! Service mapping definition and its `name:source:address:target` text form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a textual service mapping cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("invalid service mapping format: {0} (expected: servicename:sourceport:targetaddr:targetport)")]
    Format(String),

    #[error("service name cannot be empty in mapping: {0}")]
    EmptyName(String),

    #[error("invalid source port: {0}")]
    SourcePort(String),

    #[error("invalid target port: {0}")]
    TargetPort(String),
}

/// A named rule binding a source port on an overlay identity to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceMapping {
    /// Unique service name, also used to derive the overlay identity.
    pub name: String,

    /// Port to listen on inside the overlay network.
    pub source_port: u16,

    /// Backend host (name or IP).
    pub target_address: String,

    /// Backend port.
    pub target_port: u16,
}

impl ServiceMapping {
    pub fn new(
        name: impl Into<String>,
        source_port: u16,
        target_address: impl Into<String>,
        target_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            source_port,
            target_address: target_address.into(),
            target_port,
        }
    }

    /// Backend address in `host:port` form, bracketing IPv6 literals.
    pub fn target(&self) -> String {
        if self.target_address.contains(':') && !self.target_address.starts_with('[') {
            format!("[{}]:{}", self.target_address, self.target_port)
        } else {
            format!("{}:{}", self.target_address, self.target_port)
        }
    }

    /// Base URL of the backend for the HTTP reverse-proxy hop.
    pub fn target_url(&self) -> String {
        format!("http://{}", self.target())
    }
}

impl fmt::Display for ServiceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.name, self.source_port, self.target_address, self.target_port
        )
    }
}

impl FromStr for ServiceMapping {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(4, ':').collect();
        if parts.len() != 4 {
            return Err(MappingError::Format(s.to_string()));
        }

        let name = parts[0].trim();
        if name.is_empty() {
            return Err(MappingError::EmptyName(s.to_string()));
        }

        let source_port = parse_port(parts[1]).ok_or_else(|| MappingError::SourcePort(parts[1].to_string()))?;
        let target_port = parse_port(parts[3]).ok_or_else(|| MappingError::TargetPort(parts[3].to_string()))?;

        Ok(Self::new(name, source_port, parts[2], target_port))
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_mapping() {
        let mapping: ServiceMapping = "web:8080:127.0.0.1:3000".parse().unwrap();
        assert_eq!(mapping, ServiceMapping::new("web", 8080, "127.0.0.1", 3000));
        assert_eq!(mapping.target(), "127.0.0.1:3000");
        assert_eq!(mapping.target_url(), "http://127.0.0.1:3000");
    }

    #[test]
    fn trims_service_name() {
        let mapping: ServiceMapping = "  db :5432:postgres:5432".parse().unwrap();
        assert_eq!(mapping.name, "db");
        assert_eq!(mapping.target_address, "postgres");
    }

    #[test]
    fn rejects_malformed_mappings() {
        assert!(matches!("web:8080:host".parse::<ServiceMapping>(), Err(MappingError::Format(_))));
        assert!(matches!(" :8080:host:80".parse::<ServiceMapping>(), Err(MappingError::EmptyName(_))));
        assert!(matches!("web:http:host:80".parse::<ServiceMapping>(), Err(MappingError::SourcePort(_))));
        assert!(matches!("web:0:host:80".parse::<ServiceMapping>(), Err(MappingError::SourcePort(_))));
        assert!(matches!("web:80:host:70000".parse::<ServiceMapping>(), Err(MappingError::TargetPort(_))));
    }

    #[test]
    fn ipv6_target_is_bracketed() {
        let mapping = ServiceMapping::new("v6", 80, "::1", 8080);
        assert_eq!(mapping.target(), "[::1]:8080");
    }
}
