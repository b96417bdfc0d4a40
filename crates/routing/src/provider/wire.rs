//! Wire codec for GraphHopper-compatible routing services.
//!
//! Requests carry `[lon, lat]` coordinate pairs; responses are normalized
//! from meters and milliseconds to kilometers and minutes.

use model::{
    geometry::LineString,
    route_version::{Objective, Profile, RouteOptions},
};
use serde::{Deserialize, Serialize};

use super::{haversine, Matrix, Point, ProviderError, RouteLeg, RouteResult};

#[derive(Debug, Serialize)]
pub struct RouteRequest {
    pub points: Vec<[f64; 2]>,
    pub profile: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub avoid: Vec<&'static str>,
}

impl RouteRequest {
    pub fn new(points: &[Point], profile: Profile, options: &RouteOptions) -> Self {
        Self {
            points: points.iter().map(|p| [p.lon, p.lat]).collect(),
            profile: profile.as_str(),
            avoid: options.avoid.iter().map(|a| a.as_str()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatrixRequest {
    pub points: Vec<[f64; 2]>,
    pub profile: &'static str,
    pub objective: &'static str,
}

impl MatrixRequest {
    pub fn new(points: &[Point], profile: Profile, objective: Objective) -> Self {
        Self {
            points: points.iter().map(|p| [p.lon, p.lat]).collect(),
            profile: profile.as_str(),
            objective: objective.as_str(),
        }
    }
}

/// Route geometry as returned on the wire: either an encoded polyline or
/// GeoJSON-style coordinate arrays (bare or wrapped in a geometry object).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WirePoints {
    Encoded(String),
    GeoJson { coordinates: Vec<[f64; 2]> },
    Coordinates(Vec<[f64; 2]>),
}

#[derive(Debug, Deserialize)]
pub struct RouteResponse {
    pub distance_m: f64,
    pub time_ms: f64,
    pub points: WirePoints,
    #[serde(default)]
    pub legs: Vec<LegResponse>,
}

#[derive(Debug, Deserialize)]
pub struct LegResponse {
    pub distance_m: f64,
    pub time_ms: f64,
    pub points: Option<WirePoints>,
}

#[derive(Debug, Deserialize)]
pub struct MatrixResponse {
    pub distances: Vec<Vec<f64>>,
    pub times: Vec<Vec<f64>>,
}

pub fn decode_points(points: &WirePoints) -> Result<LineString, ProviderError> {
    let coordinates = match points {
        WirePoints::Encoded(encoded) => decode_polyline(encoded)
            .into_iter()
            .map(|(lat, lon)| [lon, lat])
            .collect(),
        WirePoints::GeoJson { coordinates } => coordinates.clone(),
        WirePoints::Coordinates(coordinates) => coordinates.clone(),
    };
    if coordinates.len() < 2 {
        return Err(ProviderError::Decode(
            "route geometry has fewer than two vertices".to_owned(),
        ));
    }
    Ok(LineString::new(coordinates))
}

/// Decode a Google Polyline Algorithm encoded string into `(lat, lon)` pairs.
pub fn decode_polyline(encoded: &str) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    let mut lat = 0i64;
    let mut lon = 0i64;
    let mut index = 0;
    let bytes = encoded.as_bytes();

    while index < bytes.len() {
        let mut shift = 0;
        let mut result = 0i64;
        loop {
            if index >= bytes.len() {
                break;
            }
            let b = (bytes[index] as i64) - 63;
            index += 1;
            result |= (b & 0x1f) << shift;
            shift += 5;
            if b < 0x20 {
                break;
            }
        }
        lat += if (result & 1) != 0 {
            !(result >> 1)
        } else {
            result >> 1
        };

        shift = 0;
        result = 0;
        loop {
            if index >= bytes.len() {
                break;
            }
            let b = (bytes[index] as i64) - 63;
            index += 1;
            result |= (b & 0x1f) << shift;
            shift += 5;
            if b < 0x20 {
                break;
            }
        }
        lon += if (result & 1) != 0 {
            !(result >> 1)
        } else {
            result >> 1
        };

        points.push((lat as f64 / 1e5, lon as f64 / 1e5));
    }

    points
}

/// Normalizes a route response. Durations that are not positive finite
/// numbers are replaced by the haversine estimate and noted as a warning.
pub fn decode_route(
    response: RouteResponse,
    points: &[Point],
    profile: Profile,
) -> Result<RouteResult, ProviderError> {
    let mut warnings = Vec::new();
    let geometry = decode_points(&response.points)?;

    let distance_km = response.distance_m / 1000.0;
    let duration_min = if is_valid_duration(response.time_ms) {
        response.time_ms / 60_000.0
    } else {
        warnings.push(
            "provider returned an invalid route duration; substituted haversine estimate"
                .to_owned(),
        );
        estimate_total(points, profile)
    };

    let legs = if response.legs.len() == points.len().saturating_sub(1) {
        response
            .legs
            .into_iter()
            .enumerate()
            .map(|(i, leg)| {
                let duration_min = if is_valid_duration(leg.time_ms) {
                    leg.time_ms / 60_000.0
                } else {
                    warnings.push(format!(
                        "provider returned an invalid duration for leg {}; substituted haversine estimate",
                        i
                    ));
                    haversine::leg_estimate(&points[i], &points[i + 1], profile).1
                };
                let geometry = leg.points.as_ref().and_then(|p| decode_points(p).ok());
                RouteLeg {
                    distance_km: leg.distance_m / 1000.0,
                    duration_min,
                    geometry,
                }
            })
            .collect()
    } else {
        // Leg count does not line up with the requested point pairs; keep
        // only the overall geometry and let the caller split it.
        Vec::new()
    };

    Ok(RouteResult {
        distance_km,
        duration_min,
        geometry,
        legs,
        warnings,
    })
}

/// Normalizes a matrix response, rejecting malformed or non-finite data.
pub fn decode_matrix(response: MatrixResponse, n: usize) -> Result<Matrix, ProviderError> {
    if response.distances.len() != n || response.times.len() != n {
        return Err(ProviderError::Decode(format!(
            "expected a {n}x{n} matrix, got {}x{} ",
            response.distances.len(),
            response.times.len()
        )));
    }

    let mut distance = Vec::with_capacity(n);
    let mut duration = Vec::with_capacity(n);
    for (i, (distances, times)) in response
        .distances
        .into_iter()
        .zip(response.times)
        .enumerate()
    {
        if distances.len() != n || times.len() != n {
            return Err(ProviderError::Decode(format!("matrix row {i} has wrong length")));
        }
        let mut distance_row = Vec::with_capacity(n);
        let mut duration_row = Vec::with_capacity(n);
        for (j, (d, t)) in distances.into_iter().zip(times).enumerate() {
            if i == j {
                distance_row.push(0.0);
                duration_row.push(0.0);
                continue;
            }
            if !d.is_finite() || d < 0.0 || !t.is_finite() || t < 0.0 {
                return Err(ProviderError::Decode(format!(
                    "matrix cell ({i},{j}) is not a non-negative finite number"
                )));
            }
            distance_row.push(d / 1000.0);
            duration_row.push(t / 60_000.0);
        }
        distance.push(distance_row);
        duration.push(duration_row);
    }

    Ok(Matrix {
        distance,
        duration,
        geometry: None,
    })
}

fn is_valid_duration(time_ms: f64) -> bool {
    time_ms.is_finite() && time_ms > 0.0
}

fn estimate_total(points: &[Point], profile: Profile) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine::leg_estimate(&pair[0], &pair[1], profile).1)
        .sum()
}
