use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
enum GeometryKind {
    LineString,
}

/// GeoJSON LineString. Coordinates are `[lon, lat]` pairs, per the GeoJSON
/// axis order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineString {
    #[serde(rename = "type")]
    kind: GeometryKind,
    pub coordinates: Vec<[f64; 2]>,
}

impl LineString {
    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self {
            kind: GeometryKind::LineString,
            coordinates,
        }
    }

    /// A straight segment between two points given as `(lat, lon)`.
    pub fn segment(from: (f64, f64), to: (f64, f64)) -> Self {
        Self::new(vec![[from.1, from.0], [to.1, to.0]])
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn first(&self) -> Option<[f64; 2]> {
        self.coordinates.first().copied()
    }

    pub fn last(&self) -> Option<[f64; 2]> {
        self.coordinates.last().copied()
    }

    /// Appends another line, dropping its first vertex when it repeats this
    /// line's last vertex. Used to stitch per-leg geometries into one
    /// continuous route line.
    pub fn append(&mut self, other: &LineString) {
        let mut rest = other.coordinates.as_slice();
        if let (Some(last), Some(first)) = (self.last(), other.first()) {
            if last == first {
                rest = &rest[1..];
            }
        }
        self.coordinates.extend_from_slice(rest);
    }
}
