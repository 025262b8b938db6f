//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject duplicate service names and source ports
//! - Validate value ranges (ports > 0, timeouts > 0)
//! - Check HTTPS prerequisites (state directory)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure apart from the state directory existence check
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::schema::ForwarderConfig;
use crate::config::ServiceMapping;
use crate::overlay::identity::sanitize_label;

/// A single semantic problem with a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one service mapping is required")]
    NoServices,

    #[error("service name cannot be empty")]
    EmptyServiceName,

    #[error("duplicate service name {0} found in service mappings")]
    DuplicateName(String),

    #[error("duplicate source port {0} found in service mappings")]
    DuplicatePort(u16),

    #[error("service {0}: ports must be in 1..=65535")]
    InvalidPort(String),

    #[error("service {0}: target address cannot be empty")]
    EmptyTarget(String),

    #[error("hostname must be a valid hostname, before sanitization: {raw:?}, after sanitization: {sanitized:?}")]
    InvalidHostname { raw: String, sanitized: String },

    #[error("auth key is required")]
    MissingAuthKey,

    #[error("state directory is required when HTTPS is enabled")]
    HttpsWithoutStateDir,

    #[error("state directory does not exist: {0}")]
    MissingStateDir(PathBuf),

    #[error("timeout {0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a full configuration, collecting every error.
pub fn validate_config(config: &ForwarderConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_services(&config.services).err().unwrap_or_default();

    let sanitized = sanitize_label(&config.overlay.hostname);
    if sanitized.is_empty() {
        errors.push(ValidationError::InvalidHostname {
            raw: config.overlay.hostname.clone(),
            sanitized,
        });
    }

    if config.overlay.auth_key.trim().is_empty() {
        errors.push(ValidationError::MissingAuthKey);
    }

    match &config.overlay.state_dir {
        None if config.overlay.enable_https => errors.push(ValidationError::HttpsWithoutStateDir),
        Some(dir) if !dir.is_dir() => errors.push(ValidationError::MissingStateDir(dir.clone())),
        _ => {}
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("dial_secs", timeouts.dial_secs),
        ("read_secs", timeouts.read_secs),
        ("write_secs", timeouts.write_secs),
        ("idle_secs", timeouts.idle_secs),
        ("shutdown_grace_secs", timeouts.shutdown_grace_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the service mappings alone.
///
/// The supervisor relies on this check too, so it must stay free of I/O.
pub fn validate_services(services: &[ServiceMapping]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if services.is_empty() {
        errors.push(ValidationError::NoServices);
    }

    let mut names = HashSet::new();
    let mut ports = HashSet::new();

    for service in services {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName);
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateName(service.name.clone()));
        }

        if service.source_port == 0 || service.target_port == 0 {
            errors.push(ValidationError::InvalidPort(service.name.clone()));
        } else if !ports.insert(service.source_port) {
            errors.push(ValidationError::DuplicatePort(service.source_port));
        }

        if service.target_address.trim().is_empty() {
            errors.push(ValidationError::EmptyTarget(service.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.overlay.hostname = "edge".into();
        config.overlay.auth_key = "tskey-test".into();
        config.services.push(ServiceMapping::new("web", 80, "127.0.0.1", 3000));
        config.services.push(ServiceMapping::new("db", 5432, "127.0.0.1", 5432));
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_duplicates() {
        let mut config = valid_config();
        config.services.push(ServiceMapping::new("web", 80, "10.0.0.1", 8080));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateName("web".into())));
        assert!(errors.contains(&ValidationError::DuplicatePort(80)));
    }

    #[test]
    fn collects_all_errors() {
        let mut config = ForwarderConfig::default();
        config.overlay.hostname = "!!!".into();
        config.overlay.enable_https = true;
        config.timeouts.dial_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoServices));
        assert!(errors.contains(&ValidationError::MissingAuthKey));
        assert!(errors.contains(&ValidationError::HttpsWithoutStateDir));
        assert!(errors.contains(&ValidationError::ZeroTimeout("dial_secs")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidHostname { sanitized, .. } if sanitized.is_empty())));
    }

    #[test]
    fn missing_state_dir_is_reported() {
        let mut config = valid_config();
        config.overlay.state_dir = Some(PathBuf::from("/definitely/not/here/overlay-forwarder"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::MissingStateDir(PathBuf::from(
                "/definitely/not/here/overlay-forwarder"
            ))]
        );
    }
}
