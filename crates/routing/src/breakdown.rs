//! Day-route breakdown: validates a day's stops, optionally optimizes their
//! order, fetches every leg in parallel and assembles a route version
//! payload plus a preview token.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, warn};
use model::{
    day::Day,
    geometry::LineString,
    place::Place,
    route_version::{Leg, Objective, Profile, RouteOptions, RouteTotals, RouteVersion},
    stop::Stop,
    trip::Trip,
    WithId,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use utility::id::{ulid, Id};

use crate::{
    error::BreakdownError,
    optimizer::{self, PointRole, RoutePoint},
    orchestrator::{RouteOutcome, FALLBACK_WARNING},
    provider::{haversine, Point, ProviderError},
    runtime::RoutingRuntime,
    store::{PlaceStore, PreviewToken, StoreError, VersionStore},
};

/// Minimum share of legs that must resolve before the soft deadline for a
/// partial result to be surfaced instead of an error.
const MIN_LEG_SUCCESS_RATIO: (usize, usize) = (4, 5);

#[derive(Debug, Clone)]
pub enum PlaceRef {
    Existing(Id<Place>),
    Inline {
        name: String,
        lat: f64,
        lon: f64,
        address: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StopInput {
    /// Existing stop id; inline stops get a generated one.
    pub stop_id: Option<Id<Stop>>,
    pub place: PlaceRef,
    pub fixed: bool,
    pub fixed_seq: Option<usize>,
    pub duration_minutes: Option<u32>,
}

impl StopInput {
    pub fn existing(stop_id: Id<Stop>, place_id: Id<Place>) -> Self {
        Self {
            stop_id: Some(stop_id),
            place: PlaceRef::Existing(place_id),
            fixed: false,
            fixed_seq: None,
            duration_minutes: None,
        }
    }

    pub fn inline<S: Into<String>>(name: S, lat: f64, lon: f64) -> Self {
        Self {
            stop_id: None,
            place: PlaceRef::Inline {
                name: name.into(),
                lat,
                lon,
                address: None,
            },
            fixed: false,
            fixed_seq: None,
            duration_minutes: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakdownRequest {
    pub trip_id: Id<Trip>,
    pub day_id: Id<Day>,
    pub start: StopInput,
    pub stops: Vec<StopInput>,
    pub end: StopInput,
    pub optimize: bool,
    pub profile: Profile,
    pub objective: Objective,
    pub options: RouteOptions,
    /// When set, per-stop ETAs become absolute times; offsets are always
    /// reported.
    pub depart_at: Option<DateTime<Utc>>,
}

/// Estimated arrival/departure per ordered stop, as minute offsets from the
/// start and, when `depart_at` was given, absolute times.
#[derive(Debug, Clone)]
pub struct StopEta {
    pub stop_id: Id<Stop>,
    pub arrival_offset_min: f64,
    pub departure_offset_min: f64,
    pub arrival: Option<DateTime<Utc>>,
    pub departure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DayBreakdown {
    pub request_id: String,
    /// The computed route version payload; persisted only on commit.
    pub version: RouteVersion,
    pub preview: PreviewToken,
    pub etas: Vec<StopEta>,
}

pub struct BreakdownService {
    runtime: Arc<RoutingRuntime>,
    versions: Arc<dyn VersionStore>,
    places: Arc<dyn PlaceStore>,
}

impl BreakdownService {
    pub fn new(
        runtime: Arc<RoutingRuntime>,
        versions: Arc<dyn VersionStore>,
        places: Arc<dyn PlaceStore>,
    ) -> Self {
        Self {
            runtime,
            versions,
            places,
        }
    }

    pub async fn compute_day_breakdown(
        &self,
        request: BreakdownRequest,
        cancel: CancellationToken,
    ) -> Result<DayBreakdown, BreakdownError> {
        let request_id = ulid();
        debug!(
            "[{}] computing breakdown for day {} ({} via stops, optimize={})",
            request_id,
            request.day_id,
            request.stops.len(),
            request.optimize
        );

        let (route_points, dwell_minutes) = self.resolve_points(&request).await?;
        optimizer::validate(&route_points)?;

        let mut warnings = Vec::new();
        let order = if request.optimize {
            self.optimized_order(&request, &route_points, &mut warnings)
                .await?
        } else {
            (0..route_points.len()).collect()
        };

        let leg_outcomes = self
            .fetch_legs(&request, &route_points, &order, &cancel)
            .await;
        if cancel.is_cancelled() {
            debug!("[{}] breakdown cancelled by caller", request_id);
            return Err(BreakdownError::Cancelled);
        }

        let total_legs = leg_outcomes.len();
        let resolved = leg_outcomes.iter().filter(|leg| leg.is_some()).count();
        if resolved * MIN_LEG_SUCCESS_RATIO.1 < total_legs * MIN_LEG_SUCCESS_RATIO.0 {
            warn!(
                "[{}] only {}/{} legs resolved before the deadline",
                request_id, resolved, total_legs
            );
            return Err(BreakdownError::Provider(ProviderError::Timeout));
        }

        let (legs, provider_name) = self.assemble_legs(
            &request,
            &route_points,
            &order,
            leg_outcomes,
            &mut warnings,
        )?;

        let totals = RouteTotals {
            distance_km: legs.iter().map(|leg| leg.distance_km).sum(),
            duration_min: legs.iter().map(|leg| leg.duration_min).sum(),
        };
        if !totals.distance_km.is_finite()
            || totals.distance_km < 0.0
            || !totals.duration_min.is_finite()
            || totals.duration_min < 0.0
        {
            return Err(BreakdownError::InvalidSegment { leg: 0 });
        }

        let geometry = stitch_geometry(&legs, &route_points, &order);
        let etas = schedule(&route_points, &order, &legs, &dwell_minutes, request.depart_at);

        let version = RouteVersion {
            day_id: request.day_id.clone(),
            version_number: 0,
            name: None,
            is_active: false,
            profile: request.profile,
            objective: request.objective,
            options: RouteOptions {
                avoid: request.options.avoid.clone(),
                optimize: request.optimize,
            },
            ordered_stop_ids: order
                .iter()
                .map(|&i| route_points[i].stop_id.clone())
                .collect(),
            totals,
            legs,
            geometry,
            warnings: dedup_preserving_order(warnings),
            computed_at: Utc::now(),
            provider_name,
        };

        let inputs_hash = inputs_hash(&version);
        let preview = self
            .versions
            .save_preview(version.clone(), inputs_hash)
            .await?;

        debug!(
            "[{}] breakdown done: {:.1} km / {:.1} min over {} legs via {}",
            request_id,
            version.totals.distance_km,
            version.totals.duration_min,
            version.legs.len(),
            version.provider_name
        );

        Ok(DayBreakdown {
            request_id,
            version,
            preview,
            etas,
        })
    }

    /// Commits a preview into an active route version. A commit that loses a
    /// race is retried once against the winning state.
    pub async fn commit_preview(
        &self,
        token: &str,
        name: Option<String>,
    ) -> Result<WithId<RouteVersion>, BreakdownError> {
        match self.versions.commit(token, name.clone()).await {
            Err(StoreError::VersionConflict) => {
                debug!("commit lost a version race, retrying once");
                self.versions.commit(token, name).await.map_err(Into::into)
            }
            other => other.map_err(Into::into),
        }
    }

    async fn resolve_points(
        &self,
        request: &BreakdownRequest,
    ) -> Result<(Vec<RoutePoint>, Vec<u32>), BreakdownError> {
        let total = request.stops.len() + 2;
        let inputs = std::iter::once(&request.start)
            .chain(request.stops.iter())
            .chain(std::iter::once(&request.end));

        let mut route_points = Vec::with_capacity(total);
        let mut dwell_minutes = Vec::with_capacity(total);
        for (i, input) in inputs.enumerate() {
            let role = if i == 0 {
                PointRole::Start
            } else if i == total - 1 {
                PointRole::End
            } else {
                PointRole::Via
            };
            let place = match &input.place {
                PlaceRef::Existing(id) => self.places.get(id).await?,
                PlaceRef::Inline {
                    name,
                    lat,
                    lon,
                    address,
                } => {
                    self.places
                        .upsert(name, *lat, *lon, address.clone(), serde_json::Map::new())
                        .await?
                }
            };
            route_points.push(RoutePoint {
                stop_id: input.stop_id.clone().unwrap_or_else(Id::generate),
                role,
                fixed: input.fixed || role != PointRole::Via,
                fixed_seq: input.fixed_seq,
                point: Point::new(place.content.lat, place.content.lon),
            });
            dwell_minutes.push(input.duration_minutes.unwrap_or(0));
        }
        Ok((route_points, dwell_minutes))
    }

    async fn optimized_order(
        &self,
        request: &BreakdownRequest,
        route_points: &[RoutePoint],
        warnings: &mut Vec<String>,
    ) -> Result<Vec<usize>, BreakdownError> {
        let matrix_outcome = if route_points.len() <= 20 {
            let points: Vec<Point> = route_points.iter().map(|p| p.point).collect();
            match self
                .runtime
                .orchestrator
                .matrix(&points, request.profile, request.objective)
                .await
            {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings.iter().cloned());
                    Some(outcome)
                }
                Err(why) => {
                    warn!("matrix unavailable, optimizing from estimates: {}", why);
                    None
                }
            }
        } else {
            None
        };

        let optimized = optimizer::optimize_order(
            route_points,
            request.profile,
            request.objective,
            matrix_outcome.as_ref().map(|outcome| outcome.matrix.as_ref()),
            optimizer::DEFAULT_BUDGET,
        )
        .await?;
        warnings.extend(optimized.warnings);
        Ok(optimized.order)
    }

    /// Fetches all legs concurrently, bounded by the configured semaphore.
    /// Results come back in leg order, `None` for legs that were cancelled
    /// by the soft deadline or the caller.
    async fn fetch_legs(
        &self,
        request: &BreakdownRequest,
        route_points: &[RoutePoint],
        order: &[usize],
        cancel: &CancellationToken,
    ) -> Vec<Option<RouteOutcome>> {
        let leg_cancel = cancel.child_token();
        let soft_deadline = Duration::from_secs(self.runtime.config.breakdown.soft_deadline_s);
        let deadline_guard = {
            let leg_cancel = leg_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(soft_deadline).await;
                leg_cancel.cancel();
            })
        };

        let semaphore = Arc::new(Semaphore::new(
            self.runtime.config.breakdown.max_concurrency.max(1),
        ));
        let mut handles = Vec::with_capacity(order.len().saturating_sub(1));
        for pair in order.windows(2) {
            let from = route_points[pair[0]].point;
            let to = route_points[pair[1]].point;
            let profile = request.profile;
            let options = request.options.clone();
            let semaphore = Arc::clone(&semaphore);
            let orchestrator = Arc::clone(&self.runtime.orchestrator);
            let leg_cancel = leg_cancel.clone();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = leg_cancel.cancelled() => None,
                    outcome = async {
                        let _permit = semaphore.acquire_owned().await.ok()?;
                        orchestrator.route(&[from, to], profile, &options).await.ok()
                    } => outcome,
                }
            }));
        }

        let joined = join_all(handles).await;
        deadline_guard.abort();
        joined
            .into_iter()
            .map(|handle| handle.ok().flatten())
            .collect()
    }

    fn assemble_legs(
        &self,
        request: &BreakdownRequest,
        route_points: &[RoutePoint],
        order: &[usize],
        outcomes: Vec<Option<RouteOutcome>>,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<Leg>, String), BreakdownError> {
        let mut legs = Vec::with_capacity(outcomes.len());
        let mut provider_tally: Vec<(&'static str, usize)> = Vec::new();
        let mut repaired = 0;

        for (leg_index, outcome) in outcomes.into_iter().enumerate() {
            let from = &route_points[order[leg_index]];
            let to = &route_points[order[leg_index + 1]];

            let leg = match outcome {
                Some(mut outcome) => {
                    warnings.append(&mut outcome.warnings);
                    tally(&mut provider_tally, outcome.provider_name);

                    let mut distance_km = outcome.result.distance_km;
                    let mut duration_min = outcome.result.duration_min;
                    let mut geometry = Some(outcome.result.geometry);
                    if !is_valid_metric(distance_km) || !is_valid_metric(duration_min) {
                        let (d, t) = haversine::leg_estimate(&from.point, &to.point, request.profile);
                        distance_km = d;
                        duration_min = t;
                        geometry = Some(LineString::segment(
                            (from.point.lat, from.point.lon),
                            (to.point.lat, to.point.lon),
                        ));
                        repaired += 1;
                        warnings.push(format!(
                            "invalid metric on leg {}→{}; replaced with haversine estimate",
                            from.stop_id, to.stop_id
                        ));
                    }
                    Leg {
                        from_stop_id: from.stop_id.clone(),
                        to_stop_id: to.stop_id.clone(),
                        distance_km,
                        duration_min,
                        geometry,
                    }
                }
                None => {
                    let (distance_km, duration_min) =
                        haversine::leg_estimate(&from.point, &to.point, request.profile);
                    tally(&mut provider_tally, "haversine");
                    warnings.push(format!(
                        "{} on leg {}→{}",
                        FALLBACK_WARNING, from.stop_id, to.stop_id
                    ));
                    Leg {
                        from_stop_id: from.stop_id.clone(),
                        to_stop_id: to.stop_id.clone(),
                        distance_km,
                        duration_min,
                        geometry: Some(LineString::segment(
                            (from.point.lat, from.point.lon),
                            (to.point.lat, to.point.lon),
                        )),
                    }
                }
            };
            legs.push(leg);
        }

        if repaired >= 2 {
            warnings.push("DEGRADED_QUALITY".to_owned());
        }

        Ok((legs, majority_provider(&provider_tally)))
    }
}

fn is_valid_metric(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn tally(tally: &mut Vec<(&'static str, usize)>, name: &'static str) {
    match tally.iter_mut().find(|(n, _)| *n == name) {
        Some((_, count)) => *count += 1,
        None => tally.push((name, 1)),
    }
}

/// The provider that served the most legs; ties go to the more capable
/// network provider.
fn majority_provider(tally: &[(&'static str, usize)]) -> String {
    let mut best: Option<(&'static str, usize)> = None;
    for name in ["cloud", "selfhost", "haversine"] {
        if let Some(&(_, count)) = tally.iter().find(|(n, _)| *n == name) {
            if best.map(|(_, c)| count > c).unwrap_or(true) {
                best = Some((name, count));
            }
        }
    }
    // Unknown (test) provider names fall through to the raw tally.
    if best.is_none() {
        best = tally.first().copied();
    }
    best.map(|(name, _)| name.to_owned())
        .unwrap_or_else(|| "haversine".to_owned())
}

/// Joins leg geometries into one continuous line, removing duplicated
/// boundary vertices. Falls back to a straight line through the ordered
/// stops when no leg carried a geometry.
fn stitch_geometry(legs: &[Leg], route_points: &[RoutePoint], order: &[usize]) -> LineString {
    let mut stitched: Option<LineString> = None;
    for leg in legs {
        if let Some(geometry) = &leg.geometry {
            match &mut stitched {
                None => stitched = Some(geometry.clone()),
                Some(acc) => acc.append(geometry),
            }
        }
    }
    stitched.unwrap_or_else(|| {
        LineString::new(
            order
                .iter()
                .map(|&i| [route_points[i].point.lon, route_points[i].point.lat])
                .collect(),
        )
    })
}

fn schedule(
    route_points: &[RoutePoint],
    order: &[usize],
    legs: &[Leg],
    dwell_minutes: &[u32],
    depart_at: Option<DateTime<Utc>>,
) -> Vec<StopEta> {
    let absolute = |offset_min: f64| {
        depart_at.map(|start| start + chrono::Duration::milliseconds((offset_min * 60_000.0) as i64))
    };

    let mut etas = Vec::with_capacity(order.len());
    let mut offset = 0.0;
    for (pos, &index) in order.iter().enumerate() {
        if pos > 0 {
            offset += legs[pos - 1].duration_min;
        }
        let arrival_offset_min = offset;
        offset += dwell_minutes[index] as f64;
        etas.push(StopEta {
            stop_id: route_points[index].stop_id.clone(),
            arrival_offset_min,
            departure_offset_min: offset,
            arrival: absolute(arrival_offset_min),
            departure: absolute(offset),
        });
    }
    etas
}

fn dedup_preserving_order(warnings: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    warnings
        .into_iter()
        .filter(|warning| seen.insert(warning.clone()))
        .collect()
}

/// Stable hash over the inputs that determine a route, for idempotent
/// retries: ordered stop ids, profile, objective and options.
fn inputs_hash(version: &RouteVersion) -> String {
    let mut hasher = DefaultHasher::new();
    for id in &version.ordered_stop_ids {
        id.raw().hash(&mut hasher);
    }
    version.profile.as_str().hash(&mut hasher);
    version.objective.as_str().hash(&mut hasher);
    for avoid in &version.options.avoid {
        avoid.as_str().hash(&mut hasher);
    }
    version.options.optimize.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
