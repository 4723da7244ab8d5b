use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A polygon boundary: an ordered, closed ring of `[lng, lat]` pairs.
///
/// Invariants (checked by `services::geometry::validate`, not by
/// construction): ring length >= 4, first pair equals last pair, every
/// coordinate within valid longitude/latitude bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Polygon {
    pub fn new(ring: Vec<[f64; 2]>) -> Self {
        Self {
            ring,
            properties: Map::new(),
        }
    }
}

/// A geographic point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Axis-aligned bounding box of a polygon ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}
