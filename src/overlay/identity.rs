//! Per-service overlay identities.

use std::path::PathBuf;

use crate::config::loader::parse_extra_args;
use crate::config::OverlayConfig;

/// Maximum length of a DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Everything a provider needs to register one service on the overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Service the identity belongs to.
    pub service: String,
    /// Label-safe hostname to register.
    pub hostname: String,
    pub auth_key: String,
    /// Per-service node state directory.
    pub state_dir: Option<PathBuf>,
    /// Nodes are removed from the network once they go offline.
    pub ephemeral: bool,
    pub extra_args: Vec<String>,
}

impl Identity {
    /// Derive the identity of `service` from the shared overlay settings.
    ///
    /// The hostname is `"{service}.{base}"` reduced to the label alphabet, so
    /// `("API", "edge")` becomes `api-edge`.
    pub fn for_service(service: &str, overlay: &OverlayConfig) -> Self {
        let hostname = sanitize_label(&format!("{}.{}", service, overlay.hostname));
        let state_dir = overlay
            .state_dir
            .as_ref()
            .map(|dir| dir.join(sanitize_label(service)));

        Self {
            service: service.to_string(),
            hostname,
            auth_key: overlay.auth_key.clone(),
            state_dir,
            ephemeral: true,
            extra_args: parse_extra_args(&overlay.extra_args),
        }
    }
}

/// Reduce `raw` to a valid network label: `[a-z0-9-]`, no leading, trailing
/// or repeated `-`, at most 63 characters.
pub fn sanitize_label(raw: &str) -> String {
    let mut label = String::with_capacity(raw.len());

    for ch in raw.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            label.push(ch);
        } else if !label.is_empty() && !label.ends_with('-') {
            label.push('-');
        }
    }

    label.truncate(MAX_LABEL_LEN);
    while label.ends_with('-') {
        label.pop();
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_to_label_alphabet() {
        assert_eq!(sanitize_label("Web.Edge"), "web-edge");
        assert_eq!(sanitize_label("  my_service!!v2 "), "my-service-v2");
        assert_eq!(sanitize_label("--a--b--"), "a-b");
        assert_eq!(sanitize_label("ünïcode"), "n-code");
        assert_eq!(sanitize_label("***"), "");
    }

    #[test]
    fn truncates_to_label_length() {
        let long = format!("{}-{}", "a".repeat(62), "b".repeat(10));
        let label = sanitize_label(&long);
        assert_eq!(label.len(), 62);
        assert!(!label.ends_with('-'));
    }

    #[test]
    fn derives_service_identity() {
        let overlay = OverlayConfig {
            hostname: "edge".into(),
            auth_key: "tskey-x".into(),
            state_dir: Some(PathBuf::from("/state")),
            extra_args: "--tag a".into(),
            ..OverlayConfig::default()
        };

        let identity = Identity::for_service("Grafana UI", &overlay);
        assert_eq!(identity.hostname, "grafana-ui-edge");
        assert_eq!(identity.state_dir, Some(PathBuf::from("/state/grafana-ui")));
        assert_eq!(identity.auth_key, "tskey-x");
        assert_eq!(identity.extra_args, vec!["--tag", "a"]);
        assert!(identity.ephemeral);
    }
}
