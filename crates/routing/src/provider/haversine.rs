//! In-process great-circle fallback. Always succeeds, never circuit-broken.

use std::collections::HashMap;

use async_trait::async_trait;
use model::{
    geometry::LineString,
    route_version::{Objective, Profile, RouteOptions},
};

use super::{Matrix, Point, ProviderError, RouteLeg, RouteProvider, RouteResult};

/// Assumed speeds in km/h per (profile, context). Contexts are urban, rural
/// and highway, picked by segment length.
const SPEED_CAR: [f64; 3] = [30.0, 60.0, 80.0];
const SPEED_BIKE: [f64; 3] = [15.0, 18.0, 20.0];
const SPEED_WALKING: [f64; 3] = [5.0, 5.0, 5.0];

fn speed_kmh(profile: Profile, distance_km: f64) -> f64 {
    let row = match profile {
        // The motorcycle profile shares the car speed assumptions.
        Profile::Car | Profile::Motorcycle => SPEED_CAR,
        Profile::Bike => SPEED_BIKE,
        Profile::Walking => SPEED_WALKING,
    };
    let context = if distance_km < 10.0 {
        0
    } else if distance_km < 80.0 {
        1
    } else {
        2
    };
    row[context]
}

/// Great-circle estimate for a single segment: `(distance_km, duration_min)`.
pub fn leg_estimate(from: &Point, to: &Point, profile: Profile) -> (f64, f64) {
    let distance_km = from.distance_km(to);
    let duration_min = distance_km / speed_kmh(profile, distance_km) * 60.0;
    (distance_km, duration_min)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineProvider;

#[async_trait]
impl RouteProvider for HaversineProvider {
    fn name(&self) -> &'static str {
        "haversine"
    }

    async fn compute_route(
        &self,
        points: &[Point],
        profile: Profile,
        _options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError> {
        if points.len() < 2 {
            return Err(ProviderError::Decode(
                "a route needs at least two points".to_owned(),
            ));
        }

        let mut distance_km = 0.0;
        let mut duration_min = 0.0;
        let mut legs = Vec::with_capacity(points.len() - 1);
        for pair in points.windows(2) {
            let (d, t) = leg_estimate(&pair[0], &pair[1], profile);
            distance_km += d;
            duration_min += t;
            legs.push(RouteLeg {
                distance_km: d,
                duration_min: t,
                geometry: Some(LineString::segment(
                    (pair[0].lat, pair[0].lon),
                    (pair[1].lat, pair[1].lon),
                )),
            });
        }

        let geometry = LineString::new(points.iter().map(|p| [p.lon, p.lat]).collect());

        Ok(RouteResult {
            distance_km,
            duration_min,
            geometry,
            legs,
            warnings: Vec::new(),
        })
    }

    async fn compute_matrix(
        &self,
        points: &[Point],
        profile: Profile,
        _objective: Objective,
    ) -> Result<Matrix, ProviderError> {
        let n = points.len();
        let mut distance = vec![vec![0.0; n]; n];
        let mut duration = vec![vec![0.0; n]; n];
        let mut geometry = HashMap::new();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (d, t) = leg_estimate(&points[i], &points[j], profile);
                distance[i][j] = d;
                duration[i][j] = t;
                geometry.insert(
                    (i, j),
                    LineString::segment(
                        (points[i].lat, points[i].lon),
                        (points[j].lat, points[j].lon),
                    ),
                );
            }
        }
        Ok(Matrix {
            distance,
            duration,
            geometry: Some(geometry),
        })
    }
}
