use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::{geo, id::HasId};

/// A place has coordinates that are known to be finite and in range; the
/// constructor is the only way to build one.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Place {
    pub name: String,
    pub address: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// Free-form metadata: source, normalized address components, etc.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCoordinates {
    pub lat: f64,
    pub lon: f64,
}

impl fmt::Display for InvalidCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coordinates out of range: lat={}, lon={}",
            self.lat, self.lon
        )
    }
}

impl std::error::Error for InvalidCoordinates {}

impl Place {
    pub fn new<S: Into<String>>(
        name: S,
        lat: f64,
        lon: f64,
        address: Option<String>,
    ) -> Result<Self, InvalidCoordinates> {
        if !geo::coords_in_range(lat, lon) {
            return Err(InvalidCoordinates { lat, lon });
        }
        Ok(Self {
            name: name.into(),
            address,
            lat,
            lon,
            meta: serde_json::Map::new(),
        })
    }

    pub fn with_meta<S: Into<String>>(mut self, key: S, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.meta.get("source").and_then(|value| value.as_str())
    }
}

impl HasId for Place {
    type IdType = String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Place::new("nowhere", 95.0, 10.0, None).is_err());
        assert!(Place::new("nowhere", 10.0, f64::NAN, None).is_err());
        assert!(Place::new("somewhere", 54.32, 10.12, None).is_ok());
    }

    #[test]
    fn meta_source_roundtrip() {
        let place = Place::new("harbor", 54.32, 10.12, None)
            .unwrap()
            .with_meta("source", serde_json::json!("geocoder"));
        assert_eq!(place.source(), Some("geocoder"));
    }
}
