//! Explicit configuration for the routing runtime. Every option the engine
//! recognizes is a named field here; `from_env` fills the tree from the
//! process environment and falls back to the documented defaults.

use std::{env, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    Cloud,
    Selfhost,
    CloudWithSelfhostFallback,
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cloud" => Ok(RoutingMode::Cloud),
            "selfhost" => Ok(RoutingMode::Selfhost),
            "cloud_with_selfhost_fallback" => Ok(RoutingMode::CloudWithSelfhostFallback),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_s: u64,
}

#[derive(Debug, Clone)]
pub struct SelfhostConfig {
    pub base_url: String,
    pub timeout_s: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    /// Steer matrix calls to the cloud adapter regardless of `mode`, so a
    /// local self-host can serve single routes while matrices come from the
    /// cloud.
    pub use_cloud_matrix: bool,
    pub cloud: Option<CloudConfig>,
    pub selfhost: Option<SelfhostConfig>,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failures: u32,
    pub window_s: u64,
    pub cooldown_s: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failures: 5,
            window_s: 60,
            cooldown_s: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: f64,
    /// Relative jitter, e.g. 0.2 for ±20 %.
    pub jitter: f64,
    pub max_attempts: u32,
    pub cap_total_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2.0,
            jitter: 0.2,
            max_attempts: 3,
            cap_total_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixCacheConfig {
    pub ttl_s: u64,
    pub max_entries: usize,
}

impl Default for MatrixCacheConfig {
    fn default() -> Self {
        Self {
            ttl_s: 300,
            max_entries: 128,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakdownConfig {
    pub max_concurrency: usize,
    pub soft_deadline_s: u64,
}

impl Default for BreakdownConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            soft_deadline_s: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub ttl_s: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { ttl_s: 900 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub breaker: BreakerConfig,
    pub backoff: BackoffConfig,
    pub matrix_cache: MatrixCacheConfig,
    pub breakdown: BreakdownConfig,
    pub preview: PreviewConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let cloud = env::var("ROUTING_CLOUD_BASE_URL").ok().map(|base_url| CloudConfig {
            base_url,
            api_key: env::var("ROUTING_CLOUD_API_KEY").unwrap_or_default(),
            timeout_s: var_or("ROUTING_CLOUD_TIMEOUT_S", 30),
        });
        let selfhost = env::var("ROUTING_SELFHOST_BASE_URL")
            .ok()
            .map(|base_url| SelfhostConfig {
                base_url,
                timeout_s: var_or("ROUTING_SELFHOST_TIMEOUT_S", 30),
            });

        Self {
            routing: RoutingConfig {
                mode: env::var("ROUTING_MODE")
                    .ok()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or_default(),
                use_cloud_matrix: var_or("ROUTING_USE_CLOUD_MATRIX", false),
                cloud,
                selfhost,
            },
            breaker: BreakerConfig {
                failures: var_or("BREAKER_FAILURES", 5),
                window_s: var_or("BREAKER_WINDOW_S", 60),
                cooldown_s: var_or("BREAKER_COOLDOWN_S", 30),
            },
            backoff: BackoffConfig {
                base_ms: var_or("BACKOFF_BASE_MS", 500),
                factor: var_or("BACKOFF_FACTOR", 2.0),
                jitter: var_or("BACKOFF_JITTER", 0.2),
                max_attempts: var_or("BACKOFF_MAX_ATTEMPTS", 3),
                cap_total_ms: var_or("BACKOFF_CAP_TOTAL_MS", 10_000),
            },
            matrix_cache: MatrixCacheConfig {
                ttl_s: var_or("MATRIX_CACHE_TTL_S", 300),
                max_entries: var_or("MATRIX_CACHE_MAX_ENTRIES", 128),
            },
            breakdown: BreakdownConfig {
                max_concurrency: var_or("BREAKDOWN_MAX_CONCURRENCY", 8),
                soft_deadline_s: var_or("BREAKDOWN_SOFT_DEADLINE_S", 60),
            },
            preview: PreviewConfig {
                ttl_s: var_or("PREVIEW_TTL_S", 900),
            },
        }
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
