//! Supervisor: one runner per service mapping, first fatal error wins.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{validate_services, ForwarderConfig, ValidationError};
use crate::lifecycle::runner::{ServiceError, ServiceRunner};
use crate::lifecycle::startup::StartupBarrier;
use crate::overlay::{Identity, OverlayProvider};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid service set: {}", join_errors(.0))]
    InvalidServices(Vec<ValidationError>),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Starts every service concurrently and owns their shared cancellation
/// scope.
pub struct Supervisor {
    config: ForwarderConfig,
    provider: Arc<dyn OverlayProvider>,
}

impl Supervisor {
    /// Reject conflicting service sets before anything touches the overlay.
    pub fn new(
        config: ForwarderConfig,
        provider: Arc<dyn OverlayProvider>,
    ) -> Result<Self, SupervisorError> {
        validate_services(&config.services).map_err(SupervisorError::InvalidServices)?;
        Ok(Self { config, provider })
    }

    /// Run all services until `shutdown` is cancelled or one of them fails.
    ///
    /// Returns after every runner has terminated. Cancellation of `shutdown`
    /// is a clean exit; the first fatal runner error is returned otherwise.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let scope = shutdown.child_token();
        let services = self.config.services.len();
        let barrier = StartupBarrier::new(services);

        tracing::info!(
            services = services,
            https = self.config.overlay.enable_https,
            "Supervisor starting"
        );

        let mut runners = JoinSet::new();
        for mapping in &self.config.services {
            tracing::info!(
                service = %mapping.name,
                source_port = mapping.source_port,
                target = %mapping.target(),
                "Starting service"
            );

            let identity = Identity::for_service(&mapping.name, &self.config.overlay);
            let runner = ServiceRunner::new(
                mapping.clone(),
                identity,
                self.config.overlay.enable_https,
                self.config.timeouts.clone(),
                Arc::clone(&self.provider),
                barrier.clone(),
            );
            let name = mapping.name.clone();
            let span = tracing::info_span!("service", service = %name);
            let token = scope.child_token();

            runners.spawn(
                async move {
                    let result = runner.run(token).await;
                    (name, result)
                }
                .instrument(span),
            );
        }

        let mut first_error: Option<ServiceError> = None;
        while let Some(joined) = runners.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Service task failed, stopping all services");
                    scope.cancel();
                    continue;
                }
            };

            match result {
                Ok(()) => tracing::info!(service = %name, "Service terminated"),
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Service failed, stopping all services");
                    scope.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => {
                tracing::error!(error = %e, "Supervisor finished with error");
                Err(SupervisorError::Service(e))
            }
            None => {
                tracing::info!("All services stopped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMapping;
    use crate::overlay::{OverlayError, SharedNode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RefusingProvider {
        joins: AtomicUsize,
    }

    #[async_trait]
    impl OverlayProvider for RefusingProvider {
        async fn join(&self, identity: &Identity) -> Result<SharedNode, OverlayError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            Err(OverlayError::Join {
                hostname: identity.hostname.clone(),
                reason: "refused".to_string(),
            })
        }
    }

    fn config(services: Vec<ServiceMapping>) -> ForwarderConfig {
        let mut config = ForwarderConfig::default();
        config.overlay.hostname = "edge".to_string();
        config.services = services;
        config
    }

    #[test]
    fn rejects_duplicate_ports_before_joining() {
        let provider = Arc::new(RefusingProvider::default());
        let services = vec![
            ServiceMapping::new("a", 8080, "127.0.0.1", 1),
            ServiceMapping::new("b", 8080, "127.0.0.1", 2),
        ];

        let result = Supervisor::new(config(services), provider.clone());

        assert!(matches!(result, Err(SupervisorError::InvalidServices(_))));
        assert_eq!(provider.joins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn join_failure_is_fatal() {
        let provider = Arc::new(RefusingProvider::default());
        let services = vec![
            ServiceMapping::new("a", 8080, "127.0.0.1", 1),
            ServiceMapping::new("b", 8081, "127.0.0.1", 2),
        ];
        let supervisor = Supervisor::new(config(services), provider.clone()).unwrap();

        let result = supervisor.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(SupervisorError::Service(ServiceError::Join { .. }))));
        assert!(provider.joins.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_clean() {
        let provider = Arc::new(RefusingProvider::default());
        let services = vec![ServiceMapping::new("a", 8080, "127.0.0.1", 1)];
        let supervisor = Supervisor::new(config(services), provider.clone()).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(supervisor.run(shutdown).await.is_ok());
        assert_eq!(provider.joins.load(Ordering::SeqCst), 0);
    }
}
