use crate::error::{ModelError, Result};
use crate::models::{Area, BBox};
use crate::polygon::polygon_area_km2;

/// How an area is split into upstream requests.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub tiles: Vec<BBox>,
    /// True when the single tile should carry the exact polygon filter.
    pub use_polygon_filter: bool,
    pub area_km2: f64,
}

/// Decide whether `area` fits in one upstream request or must be split into
/// a grid of `tile_deg` cells. A grid of more than `max_tiles` cells is
/// rejected before any tile is built.
pub fn decide_tiles(
    area: &Area,
    max_area_km2: f64,
    tile_deg: f64,
    max_tiles: usize,
) -> Result<TilePlan> {
    if !tile_deg.is_finite() || tile_deg <= 0.0 {
        return Err(ModelError::validation(format!(
            "tile size must be a positive number of degrees, got {tile_deg}"
        )));
    }

    let bbox = area.bbox();
    let area_km2 = polygon_area_km2(&area.ring());
    let is_polygon = area.polygon().is_some();

    if bbox.is_degenerate() || area_km2 <= max_area_km2 {
        return Ok(TilePlan {
            tiles: vec![bbox],
            use_polygon_filter: is_polygon,
            area_km2,
        });
    }

    let cells = grid_cells(&bbox, tile_deg);
    if cells > max_tiles as f64 {
        return Err(ModelError::validation(format!(
            "area needs about {cells} tiles of {tile_deg} degrees, the limit is {max_tiles}"
        )));
    }

    Ok(TilePlan {
        tiles: bbox_to_tiles(&bbox, tile_deg),
        use_polygon_filter: false,
        area_km2,
    })
}

/// Approximate cell count of the grid `bbox_to_tiles` would build.
fn grid_cells(bbox: &BBox, tile_deg: f64) -> f64 {
    let cols = ((bbox.east - bbox.west) / tile_deg).ceil();
    let rows = ((bbox.north - bbox.south) / tile_deg).ceil();
    cols * rows
}

/// Grid of `tile_deg` cells over `bbox`, west to east then south to north.
/// The last column and row are clipped to the bounds.
pub fn bbox_to_tiles(bbox: &BBox, tile_deg: f64) -> Vec<BBox> {
    let mut tiles = Vec::new();
    let mut col = 0u32;
    loop {
        let west = bbox.west + f64::from(col) * tile_deg;
        if west >= bbox.east {
            break;
        }
        let east = (west + tile_deg).min(bbox.east);
        let mut row = 0u32;
        loop {
            let south = bbox.south + f64::from(row) * tile_deg;
            if south >= bbox.north {
                break;
            }
            let north = (south + tile_deg).min(bbox.north);
            tiles.push(BBox::new(west, south, east, north));
            row += 1;
        }
        col += 1;
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn small_bbox_is_a_single_tile() {
        let bbox = BBox::new(13.38, 52.50, 13.40, 52.52);
        let plan = decide_tiles(&Area::BBox(bbox), 25.0, 0.05, 400).unwrap();
        assert_eq!(plan.tiles, vec![bbox]);
        assert!(!plan.use_polygon_filter);
    }

    #[test]
    fn small_polygon_keeps_the_polygon_filter() {
        let ring = vec![
            [13.38, 52.50],
            [13.40, 52.50],
            [13.39, 52.52],
            [13.38, 52.50],
        ];
        let plan = decide_tiles(&Area::Polygon(ring), 25.0, 0.05, 400).unwrap();
        assert_eq!(plan.tiles, vec![BBox::new(13.38, 52.50, 13.40, 52.52)]);
        assert!(plan.use_polygon_filter);
    }

    #[test]
    fn large_area_is_split_into_a_covering_grid() {
        let bbox = BBox::new(13.0, 52.0, 13.23, 52.12);
        let plan = decide_tiles(&Area::BBox(bbox), 25.0, 0.05, 400).unwrap();
        assert!(plan.tiles.len() > 1);
        assert!(!plan.use_polygon_filter);

        // 5 columns x 3 rows, edge tiles clipped
        assert_eq!(plan.tiles.len(), 15);
        let covered: f64 = plan
            .tiles
            .iter()
            .map(|t| (t.east - t.west) * (t.north - t.south))
            .sum();
        assert!(close(covered, 0.23 * 0.12));
        for tile in &plan.tiles {
            assert!(tile.west >= bbox.west && tile.east <= bbox.east + 1e-12);
            assert!(tile.south >= bbox.south && tile.north <= bbox.north + 1e-12);
            assert!(!tile.is_degenerate());
        }
        let max_east = plan.tiles.iter().map(|t| t.east).fold(f64::MIN, f64::max);
        let max_north = plan.tiles.iter().map(|t| t.north).fold(f64::MIN, f64::max);
        assert_eq!(max_east, bbox.east);
        assert_eq!(max_north, bbox.north);
    }

    #[test]
    fn large_polygon_drops_the_polygon_filter() {
        let ring = BBox::new(10.0, 50.0, 10.25, 50.25).ring();
        let plan = decide_tiles(&Area::Polygon(ring), 25.0, 0.1, 400).unwrap();
        assert_eq!(plan.tiles.len(), 9);
        assert!(!plan.use_polygon_filter);
    }

    #[test]
    fn degenerate_area_yields_one_tile() {
        let bbox = BBox::new(5.0, 5.0, 5.0, 5.0);
        let plan = decide_tiles(&Area::BBox(bbox), 0.0, 0.05, 400).unwrap();
        assert_eq!(plan.tiles, vec![bbox]);
    }

    #[test]
    fn oversized_grids_are_rejected_up_front() {
        let world = Area::BBox(BBox::new(-180.0, -85.0, 180.0, 85.0));
        let err = decide_tiles(&world, 25.0, 0.05, 400).unwrap_err();
        assert_eq!(err.status_code(), 400);

        // 0.25 x 0.25 degrees at 0.1 is a 3 x 3 grid
        let area = Area::BBox(BBox::new(10.0, 50.0, 10.25, 50.25));
        assert!(decide_tiles(&area, 25.0, 0.1, 8).is_err());
        assert_eq!(decide_tiles(&area, 25.0, 0.1, 9).unwrap().tiles.len(), 9);
    }

    #[test]
    fn rejects_invalid_tile_sizes() {
        let area = Area::BBox(BBox::new(0.0, 0.0, 1.0, 1.0));
        for size in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let err = decide_tiles(&area, 25.0, size, 400).unwrap_err();
            assert_eq!(err.status_code(), 400);
        }
    }
}
