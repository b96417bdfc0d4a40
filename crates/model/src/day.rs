use chrono::{DateTime, Days, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::trip::Trip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Active,
    Inactive,
    Deleted,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Day {
    pub trip_id: Id<Trip>,
    /// 1-based position within the trip, unique among non-deleted days.
    pub seq: u32,
    pub rest_day: bool,
    pub status: DayStatus,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Day {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Marks the day deleted. `status` and `deleted_at` always change
    /// together, so the "deleted iff deleted_at set" invariant holds.
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.status = DayStatus::Deleted;
        self.deleted_at = Some(now);
    }

    /// The calendar date of this day, derived from the trip's start date.
    /// `None` when the trip has no start date yet.
    pub fn calculated_date(&self, trip_start: Option<NaiveDate>) -> Option<NaiveDate> {
        trip_start.and_then(|start| start.checked_add_days(Days::new(self.seq as u64 - 1)))
    }
}

impl HasId for Day {
    type IdType = String;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(seq: u32) -> Day {
        Day {
            trip_id: Id::new("trip".to_owned()),
            seq,
            rest_day: false,
            status: DayStatus::Active,
            deleted_at: None,
        }
    }

    #[test]
    fn calculated_date_offsets_from_trip_start() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert_eq!(day(1).calculated_date(start), start);
        assert_eq!(
            day(3).calculated_date(start),
            NaiveDate::from_ymd_opt(2024, 6, 3)
        );
        assert_eq!(day(3).calculated_date(None), None);
    }

    #[test]
    fn soft_delete_sets_status_and_timestamp_together() {
        let mut day = day(1);
        assert!(!day.is_deleted());
        day.soft_delete(Utc::now());
        assert!(day.is_deleted());
        assert_eq!(day.status, DayStatus::Deleted);
    }
}
