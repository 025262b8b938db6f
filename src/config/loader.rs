//! Configuration loading from disk or the process environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::mapping::{MappingError, ServiceMapping};
use crate::config::schema::ForwarderConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables holding service mappings.
pub const SERVICE_PREFIX: &str = "SERVICE_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("required environment variable {0:?} is not set")]
    MissingVar(&'static str),

    #[error("invalid boolean in {var}: {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ForwarderConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ForwarderConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from the process environment.
pub fn load_from_env() -> Result<ForwarderConfig, ConfigError> {
    let config = config_from_vars(std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Build a configuration from `(name, value)` pairs without validating it.
///
/// Recognized variables: `TS_HOSTNAME`, `TS_AUTHKEY`, `TS_EXTRA_ARGS`,
/// `TS_STATE_DIR`, `TS_ENABLE_HTTPS` and every `SERVICE_*` mapping. Mappings
/// are ordered by variable name so runs are reproducible.
pub fn config_from_vars<I>(vars: I) -> Result<ForwarderConfig, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut config = ForwarderConfig::default();
    let mut hostname = None;
    let mut auth_key = None;
    let mut mappings = Vec::new();

    for (key, value) in vars {
        match key.as_str() {
            "TS_HOSTNAME" => hostname = Some(value),
            "TS_AUTHKEY" => auth_key = Some(value),
            "TS_EXTRA_ARGS" => config.overlay.extra_args = value,
            "TS_STATE_DIR" if !value.is_empty() => config.overlay.state_dir = Some(PathBuf::from(value)),
            "TS_ENABLE_HTTPS" => config.overlay.enable_https = parse_bool("TS_ENABLE_HTTPS", &value)?,
            _ if key.starts_with(SERVICE_PREFIX) => mappings.push((key, value)),
            _ => {}
        }
    }

    config.overlay.hostname = hostname.ok_or(ConfigError::MissingVar("TS_HOSTNAME"))?;
    config.overlay.auth_key = auth_key.ok_or(ConfigError::MissingVar("TS_AUTHKEY"))?;

    mappings.sort_by(|a, b| a.0.cmp(&b.0));
    config.services = mappings
        .iter()
        .map(|(_, value)| value.parse::<ServiceMapping>())
        .collect::<Result<_, _>>()?;

    Ok(config)
}

/// Parse a boolean the way environment flags are usually spelled.
fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(ConfigError::InvalidBool {
            var,
            value: other.to_string(),
        }),
    }
}

/// Split extra provider arguments on spaces; double quotes group words.
pub fn parse_extra_args(extra_args: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in extra_args.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            ' ' if !in_quote => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}
