//! Overlay network service forwarder.
//!
//! Publishes local TCP services on an overlay network, one node identity per
//! service, with an optional HTTPS edge per identity.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────────┐
//!                    │                    Supervisor                       │
//!                    │   (validated mappings, shared cancellation scope)   │
//!                    └───────┬───────────────────┬────────────────────────┘
//!                            │                   │
//!                 ┌──────────▼─────────┐  ┌──────▼─────────────┐
//!                 │  Runner "web"      │  │  Runner "db"  ...  │
//!                 │  overlay node      │  │  overlay node      │
//!                 └──┬──────────────┬──┘  └──┬─────────────────┘
//!                    │              │        │
//!        :source_port│      :80/:443│        │:source_port
//!          ┌─────────▼──┐  ┌────────▼──────┐ ┌▼───────────┐
//!          │TcpForwarder│  │  HttpsProxy   │ │TcpForwarder│
//!          └─────┬──────┘  │ redirect + TLS│ └─────┬──────┘
//!                │         └───────┬───────┘       │
//!                ▼                 ▼               ▼
//!            backend A         backend A        backend B
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use overlay_forwarder::config::{load_config, load_from_env, validate_config, ConfigError};
use overlay_forwarder::observability::{logging, metrics};
use overlay_forwarder::overlay::LocalProvider;
use overlay_forwarder::{Shutdown, Supervisor};

/// Publish local TCP services on an overlay network
#[derive(Parser, Debug)]
#[command(name = "overlay-forwarder")]
#[command(version)]
#[command(long_about = r#"
Joins the overlay network once per service and forwards each service's
source port to its backend. With HTTPS enabled every service also gets a
redirect listener on port 80 and a TLS reverse proxy on port 443.

Without --config, settings come from the environment:
  TS_HOSTNAME      Base hostname (required)
  TS_AUTHKEY       Pre-authorized key (required)
  TS_STATE_DIR     Node state directory
  TS_ENABLE_HTTPS  Enable the HTTPS proxy (true/false)
  TS_EXTRA_ARGS    Extra provider arguments
  SERVICE_*        name:source_port:target_address:target_port
"#)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration
    #[arg(long)]
    log_level: Option<String>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    validate: bool,

    /// Enable the HTTPS proxy regardless of the configuration
    #[arg(long)]
    https: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    if let Some(level) = args.log_level {
        config.observability.log_level = level;
    }
    if args.https {
        config.overlay.enable_https = true;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.overlay.hostname,
        services = config.services.len(),
        https = config.overlay.enable_https,
        "overlay-forwarder starting"
    );
    for mapping in &config.services {
        tracing::info!(mapping = %mapping, "Service mapping");
    }

    if args.validate {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let provider = Arc::new(LocalProvider::from_config(&config.overlay)?);
    let supervisor = Supervisor::new(config, provider)?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    if let Err(e) = supervisor.run(shutdown.token()).await {
        tracing::error!(error = %e, "Forwarder failed");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
