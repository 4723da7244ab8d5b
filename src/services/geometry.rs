use serde_json::{Map, Value};

use crate::models::polygon::{Bounds, GeoPoint, Polygon};
use crate::models::validation::ValidationOutcome;

/// WGS84 equatorial radius, meters.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

const ACRES_PER_SQUARE_METER: f64 = 0.000_247_105;

/// Minimum ring length for a closed polygon (triangle plus closing vertex).
const MIN_RING_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("a polygon requires at least 3 points, got {got}")]
    TooFewPoints { got: usize },
}

/// Check the ring invariants, collecting every violation.
pub fn validate(polygon: &Polygon) -> ValidationOutcome {
    let ring = &polygon.ring;
    let mut errors = Vec::new();

    if ring.len() < MIN_RING_LEN {
        errors.push(format!(
            "Polygon ring must contain at least {MIN_RING_LEN} coordinate pairs, got {}",
            ring.len()
        ));
    }

    if ring.len() >= 2 {
        let (first, last) = (ring[0], ring[ring.len() - 1]);
        if first != last {
            errors.push(
                "Polygon ring must be closed (first and last coordinates must match)".to_string(),
            );
        }
    }

    for (i, &[lng, lat]) in ring.iter().enumerate() {
        if !lng.is_finite() || !lat.is_finite() {
            errors.push(format!("Coordinate {i}: values must be finite numbers"));
            continue;
        }
        if !(-180.0..=180.0).contains(&lng) {
            errors.push(format!("Coordinate {i}: longitude {lng} is outside [-180, 180]"));
        }
        if !(-90.0..=90.0).contains(&lat) {
            errors.push(format!("Coordinate {i}: latitude {lat} is outside [-90, 90]"));
        }
    }

    ValidationOutcome::from_errors(errors)
}

/// Polygon area in acres via a spherical-excess approximation.
///
/// Sums `Δlng · (sin lat₁ + sin lat₂)` over consecutive ring edges, scaled
/// by R²/2. Accurate enough at sub-kilometer scales; degrades for large or
/// pole-spanning rings.
pub fn area_acres(polygon: &Polygon) -> f64 {
    let ring = &polygon.ring;
    if ring.len() < MIN_RING_LEN {
        return 0.0;
    }

    let mut sum = 0.0;
    for pair in ring.windows(2) {
        let [lng1, lat1] = pair[0];
        let [lng2, lat2] = pair[1];
        sum += (lng2 - lng1).to_radians()
            * (lat1.to_radians().sin() + lat2.to_radians().sin());
    }

    let square_meters = (sum * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs();
    square_meters * ACRES_PER_SQUARE_METER
}

/// Arithmetic mean of the ring vertices, excluding the duplicated closing
/// vertex.
pub fn centroid(polygon: &Polygon) -> GeoPoint {
    let ring = &polygon.ring;
    let open = open_ring(ring);
    if open.is_empty() {
        return GeoPoint { lat: 0.0, lng: 0.0 };
    }

    let n = open.len() as f64;
    let (lng_sum, lat_sum) = open
        .iter()
        .fold((0.0, 0.0), |(lngs, lats), &[lng, lat]| (lngs + lng, lats + lat));

    GeoPoint {
        lat: lat_sum / n,
        lng: lng_sum / n,
    }
}

/// Axis-aligned bounding box of the ring.
pub fn bounds(polygon: &Polygon) -> Bounds {
    if polygon.ring.is_empty() {
        return Bounds {
            min_lat: 0.0,
            max_lat: 0.0,
            min_lng: 0.0,
            max_lng: 0.0,
        };
    }
    let mut b = Bounds {
        min_lat: f64::INFINITY,
        max_lat: f64::NEG_INFINITY,
        min_lng: f64::INFINITY,
        max_lng: f64::NEG_INFINITY,
    };
    for &[lng, lat] in &polygon.ring {
        b.min_lat = b.min_lat.min(lat);
        b.max_lat = b.max_lat.max(lat);
        b.min_lng = b.min_lng.min(lng);
        b.max_lng = b.max_lng.max(lng);
    }
    b
}

/// Build a closed polygon from bare points by appending the first point as
/// the closing vertex.
pub fn from_points(
    points: &[GeoPoint],
    properties: Map<String, Value>,
) -> Result<Polygon, GeometryError> {
    if points.len() < 3 {
        return Err(GeometryError::TooFewPoints { got: points.len() });
    }

    let mut ring: Vec<[f64; 2]> = points.iter().map(|p| [p.lng, p.lat]).collect();
    ring.push(ring[0]);
    Ok(Polygon { ring, properties })
}

/// Naive decimation: keep every `max(1, floor(tolerance·10))`-th vertex plus
/// the closing vertex. Lossy and not topology-preserving. Rings of minimal
/// length, and decimations that would leave a degenerate ring, come back
/// unchanged.
pub fn simplify(polygon: &Polygon, tolerance: f64) -> Polygon {
    let ring = &polygon.ring;
    if ring.len() <= MIN_RING_LEN {
        return polygon.clone();
    }

    let step = ((tolerance * 10.0).floor() as usize).max(1);
    let open = &ring[..ring.len() - 1];
    let mut kept: Vec<[f64; 2]> = open.iter().step_by(step).copied().collect();
    kept.push(open[0]);

    if kept.len() < MIN_RING_LEN {
        return polygon.clone();
    }

    Polygon {
        ring: kept,
        properties: polygon.properties.clone(),
    }
}

fn open_ring(ring: &[[f64; 2]]) -> &[[f64; 2]] {
    if ring.len() > 1 && ring[0] == ring[ring.len() - 1] {
        &ring[..ring.len() - 1]
    } else {
        ring
    }
}
