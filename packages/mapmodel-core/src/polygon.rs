//! Geodesic area, bounding boxes and polygon parsing on lon/lat rings.

use geo_types::{Coord, LineString, Polygon};
use serde_json::Value;

use crate::models::{BBox, LonLat};

/// Equatorial earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Geodesic area of a ring in square meters (spherical excess approximation).
/// Winding order does not matter; the result is always non-negative.
pub fn ring_area_m2(ring: &[LonLat]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let [lon1, lat1] = ring[i];
        let [lon2, lat2] = ring[(i + 1) % n];
        let phi1 = lat1.to_radians();
        let phi2 = lat2.to_radians();
        let d_lambda = (lon2 - lon1).to_radians();
        area += d_lambda * (2.0 + phi1.sin() + phi2.sin());
    }
    (area * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0).abs()
}

pub fn polygon_area_km2(ring: &[LonLat]) -> f64 {
    ring_area_m2(ring) / 1_000_000.0
}

/// Bounding box of a ring. An empty ring yields a box of infinities,
/// which callers treat as degenerate.
pub fn ring_bbox(ring: &[LonLat]) -> BBox {
    let mut bbox = BBox::new(
        f64::INFINITY,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NEG_INFINITY,
    );
    for [lon, lat] in ring {
        bbox.west = bbox.west.min(*lon);
        bbox.south = bbox.south.min(*lat);
        bbox.east = bbox.east.max(*lon);
        bbox.north = bbox.north.max(*lat);
    }
    bbox
}

/// Appends the first point when the ring is open.
pub fn close_ring(mut ring: Vec<LonLat>) -> Vec<LonLat> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Parse a GeoJSON `Polygon` object or a bare `[[lon, lat], ...]` ring.
///
/// The outer ring must hold at least four finite coordinate pairs. An open
/// ring is closed by repeating its first point. Anything else yields `None`.
pub fn parse_polygon(input: &Value) -> Option<Vec<LonLat>> {
    let ring = match input {
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("Polygon") => {
            map.get("coordinates")?.as_array()?.first()?
        }
        Value::Array(_) => input,
        _ => return None,
    };

    let points = ring.as_array()?;
    if points.len() < 4 {
        return None;
    }
    let coords = points
        .iter()
        .map(parse_coordinate)
        .collect::<Option<Vec<LonLat>>>()?;
    Some(close_ring(coords))
}

/// A `[lon, lat]` pair of finite numbers.
pub fn parse_coordinate(value: &Value) -> Option<LonLat> {
    match value.as_array()?.as_slice() {
        [lon, lat] => {
            let lon = lon.as_f64()?;
            let lat = lat.as_f64()?;
            (lon.is_finite() && lat.is_finite()).then_some([lon, lat])
        }
        _ => None,
    }
}

pub fn to_geo_polygon(ring: &[LonLat]) -> Polygon<f64> {
    let coords: Vec<Coord> = ring.iter().map(|[x, y]| Coord { x: *x, y: *y }).collect();
    Polygon::new(LineString::new(coords), vec![])
}

/// Exterior ring of a `geo` polygon as lon/lat pairs.
pub fn exterior_ring(polygon: &Polygon<f64>) -> Vec<LonLat> {
    polygon.exterior().coords().map(|c| [c.x, c.y]).collect()
}
