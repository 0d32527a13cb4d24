use geo::algorithm::buffer::Buffer;
use geo_types::{Coord, LineString};

use crate::models::LonLat;
use crate::polygon::EARTH_RADIUS_M;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Local equirectangular frame centred on one point, in meters.
#[derive(Debug, Clone, Copy)]
struct LocalFrame {
    origin: LonLat,
    cos_lat: f64,
}

impl LocalFrame {
    fn new(origin: LonLat) -> Self {
        Self {
            origin,
            cos_lat: origin[1].to_radians().cos().max(1e-6),
        }
    }

    fn project(&self, [lon, lat]: LonLat) -> Coord {
        Coord {
            x: (lon - self.origin[0]) * self.cos_lat * METERS_PER_DEGREE,
            y: (lat - self.origin[1]) * METERS_PER_DEGREE,
        }
    }

    fn unproject(&self, c: Coord) -> LonLat {
        [
            self.origin[0] + c.x / (self.cos_lat * METERS_PER_DEGREE),
            self.origin[1] + c.y / METERS_PER_DEGREE,
        ]
    }
}

/// Buffer a lon/lat polyline into ribbon polygons `width_m` wide (half the
/// width on each side, round caps and joins). Returns exterior rings only.
/// Fewer than two distinct points or a non-positive width give no rings.
pub fn buffer_line(points: &[LonLat], width_m: f64) -> Vec<Vec<LonLat>> {
    if !width_m.is_finite() || width_m <= 0.0 {
        return Vec::new();
    }

    let mut distinct: Vec<LonLat> = Vec::with_capacity(points.len());
    for p in points {
        if !(p[0].is_finite() && p[1].is_finite()) {
            continue;
        }
        if distinct.last() != Some(p) {
            distinct.push(*p);
        }
    }
    if distinct.len() < 2 {
        return Vec::new();
    }

    let frame = LocalFrame::new(distinct[0]);
    let line = LineString::new(distinct.iter().map(|p| frame.project(*p)).collect());
    let buffered = line.buffer(width_m / 2.0);

    buffered
        .0
        .into_iter()
        // Only take exterior ring
        .map(|poly| {
            poly.exterior()
                .coords()
                .map(|c| frame.unproject(*c))
                .collect::<Vec<_>>()
        })
        .filter(|ring| ring.len() >= 4)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::ring_area_m2;

    #[test]
    fn ribbon_area_is_about_length_times_width() {
        // ~1113 m east-west at the equator, 10 m wide
        let rings = buffer_line(&[[0.0, 0.0], [0.01, 0.0]], 10.0);
        assert_eq!(rings.len(), 1);
        let area = ring_area_m2(&rings[0]);
        let expected = 1113.2 * 10.0 + std::f64::consts::PI * 25.0;
        assert!((area - expected).abs() / expected < 0.02, "area {area}");
        assert_eq!(rings[0].first(), rings[0].last());
    }

    #[test]
    fn ribbon_straddles_the_line() {
        let rings = buffer_line(&[[10.0, 50.0], [10.001, 50.0]], 20.0);
        let lats: Vec<f64> = rings[0].iter().map(|p| p[1]).collect();
        let north = lats.iter().cloned().fold(f64::MIN, f64::max);
        let south = lats.iter().cloned().fold(f64::MAX, f64::min);
        let half_width_deg = 10.0 / METERS_PER_DEGREE;
        assert!((north - 50.0 - half_width_deg).abs() < 1e-7);
        assert!((50.0 - south - half_width_deg).abs() < 1e-7);
    }

    #[test]
    fn degenerate_input_gives_nothing() {
        assert!(buffer_line(&[[0.0, 0.0]], 5.0).is_empty());
        assert!(buffer_line(&[[0.0, 0.0], [0.0, 0.0]], 5.0).is_empty());
        assert!(buffer_line(&[[0.0, 0.0], [0.1, 0.0]], 0.0).is_empty());
        assert!(buffer_line(&[[0.0, 0.0], [0.1, 0.0]], f64::NAN).is_empty());
    }
}
