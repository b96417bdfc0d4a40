use std::sync::Arc;

use crate::{config::Config, orchestrator::Orchestrator, provider::ProviderError};

/// Owns the process-wide routing singletons: the provider set with their
/// circuit breakers and the matrix cache, plus the configuration they were
/// built from. Constructed once at startup and injected into the breakdown
/// service.
pub struct RoutingRuntime {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
}

impl RoutingRuntime {
    pub fn new(config: Config) -> Result<Self, ProviderError> {
        let orchestrator = Arc::new(Orchestrator::new(&config)?);
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(Config::from_env())
    }

    /// Wires a runtime over a pre-built orchestrator, e.g. one with scripted
    /// providers.
    pub fn with_orchestrator(config: Config, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}
