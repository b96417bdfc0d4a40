use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::id::HasId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    Draft,
    Active,
    Completed,
    Archived,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Trip {
    pub owner_id: String,
    pub title: String,
    /// Unique per owner.
    pub slug: String,
    pub start_date: Option<NaiveDate>,
    /// IANA timezone name the trip's day dates are interpreted in.
    pub timezone: String,
    pub status: TripStatus,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Trip {
    /// A trip is live iff it has not been soft-deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

impl HasId for Trip {
    type IdType = String;
}
