//! End-to-end day-route breakdowns over the in-memory store: haversine-only
//! runs, preview/commit lifecycle, outage fallback and deadline handling.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use model::{
    place::Place,
    route_version::{Objective, Profile, RouteOptions},
    stop::Stop,
};
use routing::{
    breakdown::{BreakdownRequest, BreakdownService, StopInput},
    config::{Config, RoutingMode},
    error::BreakdownError,
    orchestrator::Orchestrator,
    provider::{Matrix, Point, ProviderError, RouteProvider, RouteResult},
    runtime::RoutingRuntime,
    store::VersionStore,
};
use storage::MemoryStore;
use tokio_util::sync::CancellationToken;
use utility::id::Id;

fn service_with(orchestrator: Arc<Orchestrator>, config: Config) -> (BreakdownService, MemoryStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemoryStore::default();
    let runtime = Arc::new(RoutingRuntime::with_orchestrator(config, orchestrator));
    let service = BreakdownService::new(
        runtime,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    (service, store)
}

/// A service with no network adapters configured: every leg comes from the
/// haversine fallback.
fn offline_service() -> (BreakdownService, MemoryStore) {
    let config = Config::default();
    let orchestrator = Arc::new(Orchestrator::with_providers(None, None, &config));
    service_with(orchestrator, config)
}

fn pair_request() -> BreakdownRequest {
    BreakdownRequest {
        trip_id: Id::new("trip-1".to_owned()),
        day_id: Id::new("day-1".to_owned()),
        start: StopInput::inline("Tel Aviv", 32.0853, 34.7818),
        stops: Vec::new(),
        end: StopInput::inline("Jerusalem", 31.7683, 35.2137),
        optimize: false,
        profile: Profile::Car,
        objective: Objective::Time,
        options: RouteOptions::default(),
        depart_at: None,
    }
}

fn stop_input(store_place: &model::WithId<Place>, stop_id: &str) -> StopInput {
    let mut input = StopInput::existing(
        Id::<Stop>::new(stop_id.to_owned()),
        store_place.id.clone(),
    );
    input.fixed = false;
    input
}

#[tokio::test]
async fn trivial_pair_produces_one_leg_and_an_active_version_after_commit() {
    let (service, store) = offline_service();

    let breakdown = service
        .compute_day_breakdown(pair_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(breakdown.version.legs.len(), 1);
    assert!(breakdown.version.geometry.coordinates.len() >= 2);
    assert!(
        breakdown.version.totals.distance_km > 50.0
            && breakdown.version.totals.distance_km < 70.0,
        "unexpected distance {}",
        breakdown.version.totals.distance_km
    );
    assert!(breakdown.version.totals.duration_min > 0.0);
    assert!(breakdown
        .version
        .warnings
        .iter()
        .any(|warning| warning.contains("fallback=haversine")));
    assert_eq!(breakdown.version.provider_name, "haversine");

    let committed = service
        .commit_preview(&breakdown.preview.token, None)
        .await
        .unwrap();
    assert_eq!(committed.content.version_number, 1);
    assert!(committed.content.is_active);

    let active = store
        .get_active(&breakdown.version.day_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, committed.id);
}

#[tokio::test]
async fn totals_equal_the_sum_of_legs_and_geometry_is_continuous() {
    let (service, _store) = offline_service();

    let mut request = pair_request();
    request.stops = vec![
        StopInput::inline("Latrun", 31.8389, 34.9806),
        StopInput::inline("Abu Ghosh", 31.8066, 35.1081),
    ];
    let breakdown = service
        .compute_day_breakdown(request, CancellationToken::new())
        .await
        .unwrap();

    let version = &breakdown.version;
    assert_eq!(version.legs.len(), 3);

    let distance_sum: f64 = version.legs.iter().map(|leg| leg.distance_km).sum();
    let duration_sum: f64 = version.legs.iter().map(|leg| leg.duration_min).sum();
    assert!((version.totals.distance_km - distance_sum).abs() <= 1e-6 * distance_sum.max(1.0));
    assert!((version.totals.duration_min - duration_sum).abs() <= 1e-6 * duration_sum.max(1.0));

    for pair in version.legs.windows(2) {
        let previous = pair[0].geometry.as_ref().unwrap();
        let next = pair[1].geometry.as_ref().unwrap();
        assert_eq!(previous.last(), next.first());
    }
}

#[tokio::test]
async fn optimization_reorders_free_via_stops() {
    let (service, store) = offline_service();

    // Places on a straight south-to-north line, vias supplied shuffled.
    let start = store.put_place(Place::new("start", 54.00, 10.0, None).unwrap()).await;
    let far = store.put_place(Place::new("far", 54.60, 10.0, None).unwrap()).await;
    let near = store.put_place(Place::new("near", 54.20, 10.0, None).unwrap()).await;
    let mid = store.put_place(Place::new("mid", 54.40, 10.0, None).unwrap()).await;
    let end = store.put_place(Place::new("end", 54.80, 10.0, None).unwrap()).await;

    let mut request = pair_request();
    request.start = stop_input(&start, "start");
    request.stops = vec![
        stop_input(&far, "far"),
        stop_input(&near, "near"),
        stop_input(&mid, "mid"),
    ];
    request.end = stop_input(&end, "end");
    request.optimize = true;

    let breakdown = service
        .compute_day_breakdown(request, CancellationToken::new())
        .await
        .unwrap();

    let ordered: Vec<String> = breakdown
        .version
        .ordered_stop_ids
        .iter()
        .map(|id| id.to_string())
        .collect();
    assert_eq!(ordered, ["start", "near", "mid", "far", "end"]);
    assert!(breakdown.version.options.optimize);
}

#[tokio::test]
async fn etas_accumulate_leg_durations_and_dwell_times() {
    let (service, _store) = offline_service();

    let mut request = pair_request();
    let mut via = StopInput::inline("Latrun", 31.8389, 34.9806);
    via.duration_minutes = Some(45);
    request.stops = vec![via];
    request.depart_at = Some(Utc::now());

    let breakdown = service
        .compute_day_breakdown(request, CancellationToken::new())
        .await
        .unwrap();

    let etas = &breakdown.etas;
    assert_eq!(etas.len(), 3);
    assert_eq!(etas[0].arrival_offset_min, 0.0);
    let first_leg = breakdown.version.legs[0].duration_min;
    assert!((etas[1].arrival_offset_min - first_leg).abs() < 1e-9);
    assert!((etas[1].departure_offset_min - (first_leg + 45.0)).abs() < 1e-9);
    assert!(etas[2].arrival_offset_min > etas[1].departure_offset_min - 1e-9);
    assert!(etas[2].arrival.is_some());
}

#[tokio::test]
async fn identical_inputs_hash_identically() {
    let (service, _store) = offline_service();

    let mut first_request = pair_request();
    first_request.start.stop_id = Some(Id::new("start".to_owned()));
    first_request.end.stop_id = Some(Id::new("end".to_owned()));
    let second_request = first_request.clone();

    let first = service
        .compute_day_breakdown(first_request, CancellationToken::new())
        .await
        .unwrap();
    let second = service
        .compute_day_breakdown(second_request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.preview.inputs_hash, second.preview.inputs_hash);

    let mut walking = pair_request();
    walking.start.stop_id = Some(Id::new("start".to_owned()));
    walking.end.stop_id = Some(Id::new("end".to_owned()));
    walking.profile = Profile::Walking;
    let third = service
        .compute_day_breakdown(walking, CancellationToken::new())
        .await
        .unwrap();
    assert_ne!(first.preview.inputs_hash, third.preview.inputs_hash);
}

struct OutageProvider {
    name: &'static str,
}

#[async_trait]
impl RouteProvider for OutageProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn compute_route(
        &self,
        _points: &[Point],
        _profile: Profile,
        _options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError> {
        Err(ProviderError::Upstream5xx { status: 502 })
    }

    async fn compute_matrix(
        &self,
        _points: &[Point],
        _profile: Profile,
        _objective: Objective,
    ) -> Result<Matrix, ProviderError> {
        Err(ProviderError::Upstream5xx { status: 502 })
    }
}

#[tokio::test(start_paused = true)]
async fn outage_on_every_adapter_degrades_to_haversine_with_warnings() {
    let mut config = Config::default();
    config.routing.mode = RoutingMode::CloudWithSelfhostFallback;
    config.backoff.jitter = 0.0;
    config.backoff.base_ms = 10;
    let orchestrator = Arc::new(Orchestrator::with_providers(
        Some(Arc::new(OutageProvider { name: "cloud" })),
        Some(Arc::new(OutageProvider { name: "selfhost" })),
        &config,
    ));
    let (service, _store) = service_with(orchestrator, config);

    let breakdown = service
        .compute_day_breakdown(pair_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(breakdown.version.provider_name, "haversine");
    assert!(breakdown
        .version
        .warnings
        .iter()
        .any(|warning| warning.contains("fallback=haversine")));
}

struct HangingProvider;

#[async_trait]
impl RouteProvider for HangingProvider {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn compute_route(
        &self,
        _points: &[Point],
        _profile: Profile,
        _options: &RouteOptions,
    ) -> Result<RouteResult, ProviderError> {
        futures::future::pending().await
    }

    async fn compute_matrix(
        &self,
        _points: &[Point],
        _profile: Profile,
        _objective: Objective,
    ) -> Result<Matrix, ProviderError> {
        futures::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn hung_legs_past_the_soft_deadline_fail_the_request() {
    let mut config = Config::default();
    config.routing.mode = RoutingMode::Cloud;
    config.breakdown.soft_deadline_s = 5;
    let orchestrator = Arc::new(Orchestrator::with_providers(
        Some(Arc::new(HangingProvider)),
        None,
        &config,
    ));
    let (service, _store) = service_with(orchestrator, config);

    let error = service
        .compute_day_breakdown(pair_request(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, BreakdownError::Provider(_)));
    assert_eq!(error.code(), "ROUTE_PROVIDER_ERROR");
}

#[tokio::test]
async fn cancelled_requests_are_reported_as_cancelled() {
    let (service, _store) = offline_service();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = service
        .compute_day_breakdown(pair_request(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(error, BreakdownError::Cancelled));
}

#[tokio::test]
async fn committing_an_expired_preview_is_terminal() {
    let config = Config::default();
    let orchestrator = Arc::new(Orchestrator::with_providers(None, None, &config));
    let store = MemoryStore::new(&routing::config::PreviewConfig { ttl_s: 0 });
    let runtime = Arc::new(RoutingRuntime::with_orchestrator(config, orchestrator));
    let service = BreakdownService::new(
        runtime,
        Arc::new(store.clone()),
        Arc::new(store),
    );

    let breakdown = service
        .compute_day_breakdown(pair_request(), CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let error = service
        .commit_preview(&breakdown.preview.token, None)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BreakdownError::Store(routing::store::StoreError::PreviewExpired)
    ));
}
