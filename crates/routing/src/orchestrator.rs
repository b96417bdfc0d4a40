//! Adapter selection, reliability policy and matrix caching. The
//! orchestrator holds the configured network adapters with one circuit
//! breaker each and substitutes the in-process haversine provider when the
//! network side is unavailable.

use std::sync::Arc;

use futures::FutureExt;
use log::warn;
use model::route_version::{Objective, Profile, RouteOptions};

use crate::{
    backoff::Backoff,
    breaker::CircuitBreaker,
    config::{BackoffConfig, Config, RoutingMode},
    matrix_cache::{MatrixCache, MatrixOutcome},
    provider::{
        graphhopper::GraphHopper, haversine::HaversineProvider, Point, ProviderError,
        RouteProvider, RouteResult,
    },
};

pub const FALLBACK_WARNING: &str = "fallback=haversine";

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub result: RouteResult,
    pub provider_name: &'static str,
    pub warnings: Vec<String>,
}

struct Adapter {
    provider: Arc<dyn RouteProvider>,
    breaker: CircuitBreaker,
}

pub struct Orchestrator {
    cloud: Option<Adapter>,
    selfhost: Option<Adapter>,
    haversine: HaversineProvider,
    cache: MatrixCache,
    mode: RoutingMode,
    use_cloud_matrix: bool,
    backoff: BackoffConfig,
}

impl Orchestrator {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let cloud = config
            .routing
            .cloud
            .as_ref()
            .map(GraphHopper::cloud)
            .transpose()?
            .map(|provider| Arc::new(provider) as Arc<dyn RouteProvider>);
        let selfhost = config
            .routing
            .selfhost
            .as_ref()
            .map(GraphHopper::selfhost)
            .transpose()?
            .map(|provider| Arc::new(provider) as Arc<dyn RouteProvider>);
        Ok(Self::with_providers(cloud, selfhost, config))
    }

    /// Assembles an orchestrator over caller-supplied adapters. Used by
    /// `new` and by tests that need scripted providers.
    pub fn with_providers(
        cloud: Option<Arc<dyn RouteProvider>>,
        selfhost: Option<Arc<dyn RouteProvider>>,
        config: &Config,
    ) -> Self {
        let adapter = |provider: Arc<dyn RouteProvider>| {
            let breaker = CircuitBreaker::new(provider.name(), config.breaker.clone());
            Adapter { provider, breaker }
        };
        Self {
            cloud: cloud.map(adapter),
            selfhost: selfhost.map(adapter),
            haversine: HaversineProvider,
            cache: MatrixCache::new(&config.matrix_cache),
            mode: config.routing.mode,
            use_cloud_matrix: config.routing.use_cloud_matrix,
            backoff: config.backoff.clone(),
        }
    }

    fn route_chain(&self) -> Vec<&Adapter> {
        match self.mode {
            RoutingMode::Cloud => self.cloud.iter().collect(),
            RoutingMode::Selfhost => self.selfhost.iter().collect(),
            RoutingMode::CloudWithSelfhostFallback => {
                self.cloud.iter().chain(self.selfhost.iter()).collect()
            }
        }
    }

    fn matrix_chain(&self) -> Vec<&Adapter> {
        if self.use_cloud_matrix {
            if let Some(cloud) = &self.cloud {
                return vec![cloud];
            }
        }
        self.route_chain()
    }

    /// Computes a single route, falling back to haversine when every
    /// configured adapter is open, rate-limit blocked, or out of retries.
    pub async fn route(
        &self,
        points: &[Point],
        profile: Profile,
        options: &RouteOptions,
    ) -> Result<RouteOutcome, ProviderError> {
        let mut warnings = Vec::new();
        for adapter in self.route_chain() {
            match self.attempt_route(adapter, points, profile, options).await {
                Ok(mut result) => {
                    warnings.append(&mut result.warnings);
                    return Ok(RouteOutcome {
                        provider_name: adapter.provider.name(),
                        result,
                        warnings,
                    });
                }
                Err(why) => {
                    warn!(
                        "adapter '{}' failed to route: {}",
                        adapter.provider.name(),
                        why
                    );
                    warnings.push(format!("{}: {}", adapter.provider.name(), why));
                }
            }
        }

        let mut result = self
            .haversine
            .compute_route(points, profile, options)
            .await?;
        warnings.append(&mut result.warnings);
        warnings.push(FALLBACK_WARNING.to_owned());
        Ok(RouteOutcome {
            result,
            provider_name: self.haversine.name(),
            warnings,
        })
    }

    /// Computes (or returns the cached) matrix for the given points. All
    /// concurrent callers for one fingerprint share a single provider call.
    pub async fn matrix(
        self: &Arc<Self>,
        points: &[Point],
        profile: Profile,
        objective: Objective,
    ) -> Result<MatrixOutcome, ProviderError> {
        let key = MatrixCache::fingerprint(points, profile, objective);
        let this = Arc::clone(self);
        let points = points.to_vec();
        self.cache
            .get_or_compute(key, move || {
                async move { this.matrix_uncached(&points, profile, objective).await }.boxed()
            })
            .await
    }

    async fn matrix_uncached(
        &self,
        points: &[Point],
        profile: Profile,
        objective: Objective,
    ) -> Result<MatrixOutcome, ProviderError> {
        let mut warnings = Vec::new();
        for adapter in self.matrix_chain() {
            match self
                .attempt_matrix(adapter, points, profile, objective)
                .await
            {
                Ok(matrix) => {
                    return Ok(MatrixOutcome {
                        matrix: Arc::new(matrix),
                        provider_name: adapter.provider.name(),
                        warnings,
                    })
                }
                Err(why) => {
                    warn!(
                        "adapter '{}' failed to compute matrix: {}",
                        adapter.provider.name(),
                        why
                    );
                    warnings.push(format!("{}: {}", adapter.provider.name(), why));
                }
            }
        }

        let matrix = self
            .haversine
            .compute_matrix(points, profile, objective)
            .await?;
        warnings.push(FALLBACK_WARNING.to_owned());
        Ok(MatrixOutcome {
            matrix: Arc::new(matrix),
            provider_name: self.haversine.name(),
            warnings,
        })
    }

    async fn attempt_route(
        &self,
        adapter: &Adapter,
        points: &[Point],
        profile: Profile,
        options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError> {
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut last: Option<ProviderError> = None;
        loop {
            if let Err(open) = adapter.breaker.try_acquire() {
                return Err(last.unwrap_or(ProviderError::RateLimited {
                    retry_after_s: open.retry_in.as_secs().max(1),
                }));
            }
            match adapter.provider.compute_route(points, profile, options).await {
                Ok(result) => {
                    adapter.breaker.on_success();
                    return Ok(result);
                }
                Err(why) => {
                    adapter.breaker.on_failure(why.retry_after_s());
                    if why.is_terminal() {
                        return Err(why);
                    }
                    let Some(delay) = backoff.next_delay() else {
                        return Err(why);
                    };
                    last = Some(why);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt_matrix(
        &self,
        adapter: &Adapter,
        points: &[Point],
        profile: Profile,
        objective: Objective,
    ) -> Result<crate::provider::Matrix, ProviderError> {
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut last: Option<ProviderError> = None;
        loop {
            if let Err(open) = adapter.breaker.try_acquire() {
                return Err(last.unwrap_or(ProviderError::RateLimited {
                    retry_after_s: open.retry_in.as_secs().max(1),
                }));
            }
            match adapter
                .provider
                .compute_matrix(points, profile, objective)
                .await
            {
                Ok(matrix) => {
                    adapter.breaker.on_success();
                    return Ok(matrix);
                }
                Err(why) => {
                    adapter.breaker.on_failure(why.retry_after_s());
                    if why.is_terminal() {
                        return Err(why);
                    }
                    let Some(delay) = backoff.next_delay() else {
                        return Err(why);
                    };
                    last = Some(why);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
