//! In-process implementation of the engine's store traits. Record state
//! lives behind one short-lived mutex; commits and day deletions are
//! additionally serialized per day so the one-active-version invariant
//! cannot be violated by races.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use indexmap::IndexMap;
use model::{
    day::Day,
    place::Place,
    route_version::RouteVersion,
    stop::Stop,
    WithId,
};
use routing::{
    config::PreviewConfig,
    store::{DayStore, PlaceStore, PreviewToken, Result, StoreError, VersionStore},
};
use tokio::sync::Mutex;
use utility::id::{ulid, Id};

struct PreviewRecord {
    day_id: Id<Day>,
    version: RouteVersion,
    inputs_hash: String,
    expires_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct State {
    days: HashMap<Id<Day>, Day>,
    stops: HashMap<Id<Stop>, Stop>,
    places: HashMap<Id<Place>, Place>,
    versions: HashMap<Id<Day>, IndexMap<Id<RouteVersion>, RouteVersion>>,
    previews: HashMap<String, PreviewRecord>,
    preview_by_day: HashMap<Id<Day>, String>,
}

struct Inner {
    state: Mutex<State>,
    day_locks: Mutex<HashMap<Id<Day>, Arc<Mutex<()>>>>,
    preview_ttl: Duration,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&PreviewConfig::default())
    }
}

impl MemoryStore {
    pub fn new(preview: &PreviewConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                day_locks: Mutex::new(HashMap::new()),
                preview_ttl: Duration::seconds(preview.ttl_s as i64),
            }),
        }
    }

    async fn day_lock(&self, day_id: &Id<Day>) -> Arc<Mutex<()>> {
        let mut locks = self.inner.day_locks.lock().await;
        locks
            .entry(day_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Seeding helpers for embedders and tests; record CRUD proper lives
    // outside the engine.

    pub async fn put_day(&self, day: WithId<Day>) {
        let mut state = self.inner.state.lock().await;
        state.days.insert(day.id, day.content);
    }

    pub async fn put_stop(&self, stop: WithId<Stop>) {
        let mut state = self.inner.state.lock().await;
        state.stops.insert(stop.id, stop.content);
    }

    pub async fn put_place(&self, place: Place) -> WithId<Place> {
        let id = Id::generate();
        let mut state = self.inner.state.lock().await;
        state.places.insert(id.clone(), place.clone());
        WithId::new(id, place)
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn save_preview(
        &self,
        version: RouteVersion,
        inputs_hash: String,
    ) -> Result<PreviewToken> {
        let token = ulid();
        let day_id = version.day_id.clone();
        let expires_at = Utc::now() + self.inner.preview_ttl;

        let mut state = self.inner.state.lock().await;
        let now = Utc::now();
        state.previews.retain(|_, record| record.expires_at >= now);
        // The new preview becomes the day's outstanding one; a token handed
        // out earlier stays committable until it expires.
        state.preview_by_day.remove(&day_id);
        state.previews.insert(
            token.clone(),
            PreviewRecord {
                day_id: day_id.clone(),
                version,
                inputs_hash: inputs_hash.clone(),
                expires_at,
            },
        );
        state.preview_by_day.insert(day_id.clone(), token.clone());

        Ok(PreviewToken {
            token,
            day_id,
            expires_at,
            inputs_hash,
        })
    }

    async fn get_preview(&self, token: &str) -> Result<RouteVersion> {
        let mut state = self.inner.state.lock().await;
        let record = state
            .previews
            .get(token)
            .ok_or(StoreError::PreviewNotFound)?;
        if record.expires_at < Utc::now() {
            let day_id = record.day_id.clone();
            state.previews.remove(token);
            if state.preview_by_day.get(&day_id).map(String::as_str) == Some(token) {
                state.preview_by_day.remove(&day_id);
            }
            return Err(StoreError::PreviewExpired);
        }
        Ok(record.version.clone())
    }

    async fn commit(&self, token: &str, name: Option<String>) -> Result<WithId<RouteVersion>> {
        // Find the day before taking its lock; the preview may be consumed
        // by a racing commit in between, which the re-check below catches.
        let day_id = {
            let state = self.inner.state.lock().await;
            state
                .previews
                .get(token)
                .map(|record| record.day_id.clone())
                .ok_or(StoreError::PreviewNotFound)?
        };
        let day_lock = self.day_lock(&day_id).await;
        let _guard = day_lock.lock().await;

        let mut state = self.inner.state.lock().await;
        let record = state
            .previews
            .remove(token)
            .ok_or(StoreError::PreviewNotFound)?;
        // Only untrack the day's outstanding preview when it is the one
        // being consumed; committing a superseded token must leave the
        // current one in place.
        if state.preview_by_day.get(&record.day_id).map(String::as_str) == Some(token) {
            state.preview_by_day.remove(&record.day_id);
        }
        if record.expires_at < Utc::now() {
            return Err(StoreError::PreviewExpired);
        }
        // A commit must not resurrect versions for a soft-deleted day.
        if state
            .days
            .get(&record.day_id)
            .map(|day| day.is_deleted())
            .unwrap_or(false)
        {
            return Err(StoreError::NotFound);
        }

        let versions = state.versions.entry(record.day_id.clone()).or_default();
        let version_number = versions
            .values()
            .map(|version| version.version_number)
            .max()
            .unwrap_or(0)
            + 1;
        for version in versions.values_mut() {
            version.is_active = false;
        }

        let mut version = record.version;
        version.version_number = version_number;
        version.is_active = true;
        version.name = Some(name.unwrap_or_else(|| {
            format!("Optimized for {}", version.objective.as_str())
        }));

        let id = Id::<RouteVersion>::generate();
        versions.insert(id.clone(), version.clone());

        Ok(WithId::new(id, version))
    }

    async fn list_versions(&self, day_id: &Id<Day>) -> Result<Vec<WithId<RouteVersion>>> {
        let state = self.inner.state.lock().await;
        Ok(state
            .versions
            .get(day_id)
            .map(|versions| {
                versions
                    .iter()
                    .map(|(id, version)| WithId::new(id.clone(), version.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_active(&self, day_id: &Id<Day>) -> Result<Option<WithId<RouteVersion>>> {
        let state = self.inner.state.lock().await;
        Ok(state.versions.get(day_id).and_then(|versions| {
            versions
                .iter()
                .find(|(_, version)| version.is_active)
                .map(|(id, version)| WithId::new(id.clone(), version.clone()))
        }))
    }

    async fn set_active(&self, day_id: &Id<Day>, version_id: &Id<RouteVersion>) -> Result<()> {
        let day_lock = self.day_lock(day_id).await;
        let _guard = day_lock.lock().await;

        let mut state = self.inner.state.lock().await;
        let versions = state.versions.get_mut(day_id).ok_or(StoreError::NotFound)?;
        if !versions.contains_key(version_id) {
            return Err(StoreError::NotFound);
        }
        for (id, version) in versions.iter_mut() {
            version.is_active = id == version_id;
        }
        Ok(())
    }

    async fn delete_for_day(&self, day_id: &Id<Day>) -> Result<usize> {
        let mut state = self.inner.state.lock().await;
        let removed = state
            .versions
            .remove(day_id)
            .map(|versions| versions.len())
            .unwrap_or(0);
        // Every preview of the day dies, superseded tokens included.
        state.preview_by_day.remove(day_id);
        state.previews.retain(|_, record| &record.day_id != day_id);
        Ok(removed)
    }
}

#[async_trait]
impl PlaceStore for MemoryStore {
    async fn get(&self, id: &Id<Place>) -> Result<WithId<Place>> {
        let state = self.inner.state.lock().await;
        state
            .places
            .get(id)
            .map(|place| WithId::new(id.clone(), place.clone()))
            .ok_or(StoreError::NotFound)
    }

    async fn upsert(
        &self,
        name: &str,
        lat: f64,
        lon: f64,
        address: Option<String>,
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WithId<Place>> {
        let mut state = self.inner.state.lock().await;

        let same = |a: f64, b: f64| (a - b).abs() < 5e-7;
        if let Some((id, place)) = state
            .places
            .iter()
            .find(|(_, place)| place.name == name && same(place.lat, lat) && same(place.lon, lon))
        {
            return Ok(WithId::new(id.clone(), place.clone()));
        }

        let mut place = Place::new(name, lat, lon, address).map_err(StoreError::other)?;
        place.meta = meta;
        let id = Id::<Place>::generate();
        state.places.insert(id.clone(), place.clone());
        Ok(WithId::new(id, place))
    }
}

#[async_trait]
impl DayStore for MemoryStore {
    async fn get_day(&self, day_id: &Id<Day>) -> Result<WithId<Day>> {
        let state = self.inner.state.lock().await;
        state
            .days
            .get(day_id)
            .map(|day| WithId::new(day_id.clone(), day.clone()))
            .ok_or(StoreError::NotFound)
    }

    async fn stops_for_day(&self, day_id: &Id<Day>) -> Result<Vec<WithId<Stop>>> {
        let state = self.inner.state.lock().await;
        let mut stops: Vec<WithId<Stop>> = state
            .stops
            .iter()
            .filter(|(_, stop)| &stop.day_id == day_id)
            .map(|(id, stop)| WithId::new(id.clone(), stop.clone()))
            .collect();
        stops.sort_by_key(|stop| stop.content.seq);
        Ok(stops)
    }

    async fn soft_delete_day(&self, day_id: &Id<Day>) -> Result<()> {
        let day_lock = self.day_lock(day_id).await;
        let _guard = day_lock.lock().await;

        let now = Utc::now();
        {
            let mut state = self.inner.state.lock().await;
            let day = state.days.get_mut(day_id).ok_or(StoreError::NotFound)?;
            day.soft_delete(now);

            for stop in state.stops.values_mut() {
                if &stop.day_id == day_id {
                    stop.soft_delete(now);
                }
            }
        }

        // Versions are gone for good; previews die with them.
        self.delete_for_day(day_id).await?;
        Ok(())
    }
}
