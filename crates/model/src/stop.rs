use chrono::{DateTime, NaiveTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::{day::Day, place::Place, trip::Trip};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    Start,
    Via,
    End,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Stop {
    pub day_id: Id<Day>,
    pub trip_id: Id<Trip>,
    pub place_id: Id<Place>,
    /// 1-based position within the day, unique among non-deleted stops.
    pub seq: u32,
    pub kind: StopKind,
    /// Fixed stops keep their position under optimization. Start and end
    /// stops are always fixed.
    pub fixed: bool,
    pub notes: Option<String>,
    pub stop_type: Option<String>,
    pub arrival_time: Option<NaiveTime>,
    pub departure_time: Option<NaiveTime>,
    /// Planned dwell time at the stop.
    pub duration_minutes: Option<u32>,
    pub priority: Option<i32>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Stop {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
    }
}

impl HasId for Stop {
    type IdType = String;
}
