use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{day::Day, geometry::LineString, stop::Stop};

/// Routing profile the road network is traversed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Car,
    Motorcycle,
    Bike,
    Walking,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Car => "car",
            Profile::Motorcycle => "motorcycle",
            Profile::Bike => "bike",
            Profile::Walking => "walking",
        }
    }
}

/// The scalar minimized during optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Time,
    Distance,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Time => "time",
            Objective::Distance => "distance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Avoid {
    Tolls,
    Ferries,
    Highways,
}

impl Avoid {
    pub fn as_str(&self) -> &'static str {
        match self {
            Avoid::Tolls => "tolls",
            Avoid::Ferries => "ferries",
            Avoid::Highways => "highways",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouteOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avoid: Vec<Avoid>,
    #[serde(default)]
    pub optimize: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouteTotals {
    pub distance_km: f64,
    pub duration_min: f64,
}

/// A segment between two successive ordered stops.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Leg {
    pub from_stop_id: Id<Stop>,
    pub to_stop_id: Id<Stop>,
    pub distance_km: f64,
    pub duration_min: f64,
    /// Sub-LineString for this leg; absent when the provider only returned
    /// an overall geometry.
    pub geometry: Option<LineString>,
}

/// A computed route over a day. At most one version per day is active.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RouteVersion {
    pub day_id: Id<Day>,
    /// Monotonic per day, assigned at commit time.
    pub version_number: u32,
    pub name: Option<String>,
    pub is_active: bool,
    pub profile: Profile,
    pub objective: Objective,
    pub options: RouteOptions,
    pub ordered_stop_ids: Vec<Id<Stop>>,
    pub totals: RouteTotals,
    pub legs: Vec<Leg>,
    pub geometry: LineString,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub computed_at: DateTime<Utc>,
    pub provider_name: String,
}

impl HasId for RouteVersion {
    type IdType = String;
}
