// Utility functions to generate consistent cache keys across the pipeline.

use serde::Serialize;

use crate::models::{Area, BBox, LonLat};

/// Generate a consistent key for a bounding box: "west_south_east_north".
pub fn make_bbox_key(bbox: &BBox) -> String {
    format!("{}_{}_{}_{}", bbox.west, bbox.south, bbox.east, bbox.north)
}

/// Key for a polygon ring: "lon,lat;lon,lat;...".
pub fn make_ring_key(ring: &[LonLat]) -> String {
    ring.iter()
        .map(|[lon, lat]| format!("{},{}", lon, lat))
        .collect::<Vec<_>>()
        .join(";")
}

/// Serialized fingerprint of every parameter that shapes a result.
/// Serialization of plain option structs does not fail; an empty string
/// is used if it ever does.
pub fn make_params_key<T: Serialize>(params: &T) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

/// If `filter_str` is empty, returns the prefix; otherwise "prefix_filterStr".
pub fn make_inner_key(prefix: &str, filter_str: &str) -> String {
    if filter_str.is_empty() {
        prefix.to_string()
    } else {
        format!("{}_{}", prefix, filter_str)
    }
}

/// Tile cache key: tile bbox, the polygon when it filters the query, and
/// the parameter fingerprint.
pub fn make_tile_key(tile: &BBox, polygon: Option<&[LonLat]>, params_key: &str) -> String {
    let area = make_inner_key(
        &make_bbox_key(tile),
        &polygon.map(make_ring_key).unwrap_or_default(),
    );
    format!("tile:{}|{}", area, params_key)
}

/// Whole-request cache key: area identity plus the parameter fingerprint.
pub fn make_request_key(area: &Area, params_key: &str) -> String {
    let area = match area {
        Area::BBox(bbox) => format!("bbox:{}", make_bbox_key(bbox)),
        Area::Polygon(ring) => format!("poly:{}", make_ring_key(ring)),
    };
    format!("model:{}|{}", area, params_key)
}
