//! Collaborator traits for persistence. The engine only talks to these
//! interfaces; `storage` ships the in-process implementation and a SQL
//! database can stand in behind the same traits.

use std::{error, fmt, result};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{day::Day, place::Place, route_version::RouteVersion, stop::Stop, WithId};
use serde::Serialize;
use utility::id::Id;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    PreviewNotFound,
    PreviewExpired,
    /// Two commits raced on the same day; the losing transaction may be
    /// retried.
    VersionConflict,
    Other(Box<dyn error::Error + Send + Sync>),
}

impl StoreError {
    pub fn other<E: error::Error + Send + Sync + 'static>(why: E) -> Self {
        Self::Other(Box::new(why))
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound => "NOT_FOUND",
            StoreError::PreviewNotFound => "PREVIEW_NOT_FOUND",
            StoreError::PreviewExpired => "PREVIEW_EXPIRED",
            StoreError::VersionConflict => "VERSION_CONFLICT",
            StoreError::Other(_) => "STORE_ERROR",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "not found"),
            StoreError::PreviewNotFound => write!(f, "preview not found"),
            StoreError::PreviewExpired => write!(f, "preview expired"),
            StoreError::VersionConflict => write!(f, "a concurrent commit won the race"),
            StoreError::Other(why) => write!(f, "storage error: {}", why),
        }
    }
}

impl error::Error for StoreError {}

pub type Result<T> = result::Result<T, StoreError>;

/// Opaque handle to a computed-but-unpersisted route, consumed once by
/// `commit`.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewToken {
    pub token: String,
    pub day_id: Id<Day>,
    pub expires_at: DateTime<Utc>,
    /// Stable hash over the inputs the route was computed from, so callers
    /// can recognize an equivalent retry.
    pub inputs_hash: String,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Stores a computed route as the day's outstanding preview. A day has
    /// at most one preview; saving a new one invalidates the prior.
    async fn save_preview(
        &self,
        version: RouteVersion,
        inputs_hash: String,
    ) -> Result<PreviewToken>;

    async fn get_preview(&self, token: &str) -> Result<RouteVersion>;

    /// Atomically: load the preview, assign the day's next version number,
    /// activate it, deactivate the prior active version, delete the preview.
    async fn commit(&self, token: &str, name: Option<String>) -> Result<WithId<RouteVersion>>;

    async fn list_versions(&self, day_id: &Id<Day>) -> Result<Vec<WithId<RouteVersion>>>;

    async fn get_active(&self, day_id: &Id<Day>) -> Result<Option<WithId<RouteVersion>>>;

    async fn set_active(&self, day_id: &Id<Day>, version_id: &Id<RouteVersion>) -> Result<()>;

    /// Hard-deletes every version of the day along with all of its
    /// outstanding previews. Called by the day-deletion cascade; returns the
    /// number of versions removed.
    async fn delete_for_day(&self, day_id: &Id<Day>) -> Result<usize>;
}

#[async_trait]
pub trait PlaceStore: Send + Sync {
    async fn get(&self, id: &Id<Place>) -> Result<WithId<Place>>;

    /// Creates a place for an inline location, or returns the existing one
    /// when name and rounded coordinates already match.
    async fn upsert(
        &self,
        name: &str,
        lat: f64,
        lon: f64,
        address: Option<String>,
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WithId<Place>>;
}

#[async_trait]
pub trait DayStore: Send + Sync {
    async fn get_day(&self, day_id: &Id<Day>) -> Result<WithId<Day>>;

    async fn stops_for_day(&self, day_id: &Id<Day>) -> Result<Vec<WithId<Stop>>>;

    /// Soft-deletes the day, soft-deletes its stops and hard-deletes its
    /// route versions in one transaction.
    async fn soft_delete_day(&self, day_id: &Id<Day>) -> Result<()>;
}
