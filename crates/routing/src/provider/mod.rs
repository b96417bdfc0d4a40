use std::{collections::HashMap, error, fmt, sync::Arc};

use async_trait::async_trait;
use model::{
    geometry::LineString,
    route_version::{Objective, Profile, RouteOptions},
};
use utility::geo;

pub mod graphhopper;
pub mod haversine;
pub mod wire;

/// A coordinate pair. Kept separate from the GeoJSON axis order: this is
/// always `(lat, lon)`, the wire layer flips where needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn distance_km(&self, other: &Point) -> f64 {
        geo::haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }
}

/// One segment of a computed route.
#[derive(Debug, Clone)]
pub struct RouteLeg {
    pub distance_km: f64,
    pub duration_min: f64,
    pub geometry: Option<LineString>,
}

/// A single route over an ordered list of points.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub distance_km: f64,
    pub duration_min: f64,
    pub geometry: LineString,
    /// One entry per consecutive point pair; empty when the provider only
    /// returned an overall geometry.
    pub legs: Vec<RouteLeg>,
    pub warnings: Vec<String>,
}

/// N×N distance/duration matrix over a list of points. Values are
/// kilometers and minutes, non-negative and finite, zero on the diagonal.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub distance: Vec<Vec<f64>>,
    pub duration: Vec<Vec<f64>>,
    /// Straight-line geometries per `(from, to)` index pair, filled by
    /// providers that can produce them cheaply.
    pub geometry: Option<HashMap<(usize, usize), LineString>>,
}

impl Matrix {
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn metric(&self, objective: Objective, from: usize, to: usize) -> f64 {
        match objective {
            Objective::Time => self.duration[from][to],
            Objective::Distance => self.distance[from][to],
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProviderError {
    RateLimited { retry_after_s: u64 },
    Upstream5xx { status: u16 },
    Upstream4xx { status: u16, message: String },
    Timeout,
    Network(Arc<reqwest::Error>),
    Decode(String),
}

impl ProviderError {
    /// Terminal errors are not retried against the same adapter.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProviderError::Upstream4xx { .. } | ProviderError::Decode(_)
        )
    }

    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_s } => Some(*retry_after_s),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "PROVIDER_RATE_LIMITED",
            ProviderError::Upstream5xx { .. } | ProviderError::Upstream4xx { .. } => {
                "PROVIDER_UPSTREAM"
            }
            ProviderError::Timeout => "PROVIDER_TIMEOUT",
            ProviderError::Network(_) => "PROVIDER_NETWORK",
            ProviderError::Decode(_) => "PROVIDER_UPSTREAM",
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimited { retry_after_s } => {
                write!(f, "rate limited, retry after {}s", retry_after_s)
            }
            ProviderError::Upstream5xx { status } => {
                write!(f, "upstream server error ({})", status)
            }
            ProviderError::Upstream4xx { status, message } => {
                write!(f, "upstream rejected the request ({}): {}", status, message)
            }
            ProviderError::Timeout => write!(f, "request timed out"),
            ProviderError::Network(why) => write!(f, "network error: {}", why),
            ProviderError::Decode(why) => write!(f, "invalid provider response: {}", why),
        }
    }
}

impl error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(why: reqwest::Error) -> Self {
        if why.is_timeout() {
            ProviderError::Timeout
        } else if why.is_decode() {
            ProviderError::Decode(why.to_string())
        } else {
            ProviderError::Network(Arc::new(why))
        }
    }
}

/// Capability set every routing backend exposes: one route over an ordered
/// point list, and a full distance/duration matrix.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compute_route(
        &self,
        points: &[Point],
        profile: Profile,
        options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError>;

    async fn compute_matrix(
        &self,
        points: &[Point],
        profile: Profile,
        objective: Objective,
    ) -> Result<Matrix, ProviderError>;
}
