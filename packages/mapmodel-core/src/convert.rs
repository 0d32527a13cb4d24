//! Turns raw upstream elements into classified, height-annotated features
//! plus a GeoJSON overlay of the same pieces.

use std::collections::HashMap;

use geo::{BooleanOps, Intersects};
use geo_types::Polygon;
use geojson::feature::Id;
use geojson::{Feature, Geometry, JsonObject, JsonValue};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buffer::buffer_line;
use crate::classify::{building_height_m, classify, Class};
use crate::models::{
    BuildingSubtype, ConvertedFeature, ElementKind, GeneratorOptions, LonLat, ModelResult,
    RawElement,
};
use crate::polygon::{exterior_ring, ring_area_m2, to_geo_polygon};
use crate::widths::WidthTable;

const PIER_WIDTH_M: f64 = 4.0;
const ROAD_HEIGHT_M: f64 = 0.001;

/// Model-space scaling shared by every feature of a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertParams {
    pub scale: f64,
    pub base_height: f64,
    pub building_multiplier: f64,
}

impl Default for ConvertParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            base_height: 0.0,
            building_multiplier: 1.0,
        }
    }
}

/// One polygon produced from an element, before part numbering.
struct Piece {
    class: Class,
    ring: Vec<LonLat>,
    area_m2: f64,
    height_raw: f64,
    height: f64,
    width_m: Option<f64>,
}

pub struct Converter<'a> {
    widths: &'a WidthTable,
    options: &'a GeneratorOptions,
    params: ConvertParams,
    clip: Option<Polygon<f64>>,
    area_filter: Option<Polygon<f64>>,
}

impl<'a> Converter<'a> {
    pub fn new(
        widths: &'a WidthTable,
        options: &'a GeneratorOptions,
        params: ConvertParams,
    ) -> Self {
        Self {
            widths,
            options,
            params,
            clip: None,
            area_filter: None,
        }
    }

    /// Clip every piece to `ring` when the options ask for clip-to-shape.
    pub fn with_clip(mut self, ring: Option<&[LonLat]>) -> Self {
        self.clip = ring
            .filter(|_| self.options.clip_to_shape)
            .filter(|r| r.len() >= 4)
            .map(to_geo_polygon);
        self
    }

    /// Drop pieces that do not touch `ring` at all.
    pub fn with_area_filter(mut self, ring: Option<&[LonLat]>) -> Self {
        self.area_filter = ring.filter(|r| r.len() >= 4).map(to_geo_polygon);
        self
    }

    pub fn convert(&self, elements: &[RawElement]) -> ModelResult {
        let pieces: Vec<Vec<Piece>> = elements
            .par_iter()
            .map(|element| self.convert_element(element))
            .collect();

        let mut parts: HashMap<(ElementKind, i64), u32> = HashMap::new();
        let mut features = Vec::new();
        let mut overlay = Vec::new();

        for (element, pieces) in elements.iter().zip(pieces) {
            for piece in pieces {
                let counter = parts.entry((element.kind, element.id)).or_insert(0);
                let part = *counter;
                *counter += 1;

                overlay.push(self.overlay_feature(element, part, &piece));
                features.push(self.feature(element, part, piece));
            }
        }

        ModelResult::new(features, overlay)
    }

    fn convert_element(&self, element: &RawElement) -> Vec<Piece> {
        let Some(class) = classify(&element.tags, self.options) else {
            return Vec::new();
        };

        let (rings, width_m) = match class {
            Class::Road => {
                let width = self.widths.road_width_for(&element.tags);
                (buffer_line(&element.geometry, width), Some(width))
            }
            Class::Waterway => {
                let width = self.widths.waterway_width_for(&element.tags);
                (buffer_line(&element.geometry, width), Some(width))
            }
            Class::Pier if !element.is_closed() => (
                buffer_line(&element.geometry, PIER_WIDTH_M),
                Some(PIER_WIDTH_M),
            ),
            _ if element.is_closed() => (vec![element.geometry.clone()], None),
            // Open ways cannot describe an area
            _ => return Vec::new(),
        };

        let (height_raw, height) = self.heights(class, element);
        let min_area = self.min_area_m2(class);

        rings
            .into_iter()
            .flat_map(|ring| self.clip_ring(ring))
            .filter(|ring| self.passes_area_filter(ring))
            .filter_map(|ring| {
                let area_m2 = ring_area_m2(&ring);
                if area_m2 <= 0.0 || area_m2 < min_area {
                    return None;
                }
                Some(Piece {
                    class,
                    ring,
                    area_m2,
                    height_raw,
                    height,
                    width_m,
                })
            })
            .collect()
    }

    /// Raw height in meters and the final absolute height.
    fn heights(&self, class: Class, element: &RawElement) -> (f64, f64) {
        let base = self.params.base_height;
        let o = self.options;
        match class {
            Class::Building(_) => {
                let raw = building_height_m(&element.tags);
                let height_mm =
                    (raw * 1000.0 * self.params.building_multiplier).max(o.min_building_height_mm);
                (raw, base + height_mm / 1000.0)
            }
            Class::Road => (ROAD_HEIGHT_M, base + ROAD_HEIGHT_M),
            Class::Waterway | Class::Water => extrusion(base, o.water_height_mm),
            Class::Sand => extrusion(base, o.beach_height_mm),
            Class::Pier => extrusion(base, o.pier_height_mm),
            Class::Green => extrusion(base, o.greenery_height_mm),
        }
    }

    fn min_area_m2(&self, class: Class) -> f64 {
        match class {
            Class::Building(_) => self.options.min_building_area_m2,
            Class::Water | Class::Waterway => self.options.min_water_area_m2,
            _ => 0.0,
        }
    }

    fn clip_ring(&self, ring: Vec<LonLat>) -> Vec<Vec<LonLat>> {
        let Some(clip) = &self.clip else {
            return vec![ring];
        };
        to_geo_polygon(&ring)
            .intersection(clip)
            .0
            .iter()
            .map(exterior_ring)
            .filter(|r| r.len() >= 4)
            .collect()
    }

    fn passes_area_filter(&self, ring: &[LonLat]) -> bool {
        match &self.area_filter {
            Some(filter) => to_geo_polygon(ring).intersects(filter),
            None => true,
        }
    }

    fn feature(&self, element: &RawElement, part: u32, piece: Piece) -> ConvertedFeature {
        let ConvertParams {
            scale, base_height, ..
        } = self.params;
        ConvertedFeature {
            id: element.id,
            osm_type: element.kind,
            part,
            feature_type: piece.class.feature_type(),
            subtype: subtype(piece.class),
            geometry: piece
                .ring
                .iter()
                .map(|[lon, lat]| [lon * scale, base_height, lat * scale])
                .collect(),
            height: piece.height,
        }
    }

    fn overlay_feature(&self, element: &RawElement, part: u32, piece: &Piece) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("id".into(), JsonValue::from(element.id));
        properties.insert("height_raw".into(), JsonValue::from(piece.height_raw));
        properties.insert("base_height".into(), JsonValue::from(self.params.base_height));
        properties.insert("height_final".into(), JsonValue::from(piece.height));
        properties.insert(
            "featureType".into(),
            JsonValue::from(piece.class.feature_type().as_str()),
        );
        if let Some(name) = element.tags.get("name") {
            properties.insert("name".into(), JsonValue::from(name));
        }
        if let Some(subtype) = subtype(piece.class) {
            properties.insert("subtype".into(), JsonValue::from(subtype.as_str()));
        }
        properties.insert("area_m2".into(), JsonValue::from(piece.area_m2));
        if let Some(width) = piece.width_m {
            properties.insert("width_m".into(), JsonValue::from(width));
        }

        let ring: Vec<Vec<f64>> = piece.ring.iter().map(|p| p.to_vec()).collect();
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::Polygon(vec![ring]))),
            id: Some(Id::String(overlay_id(element.kind, element.id, part))),
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

fn extrusion(base: f64, height_mm: f64) -> (f64, f64) {
    let meters = height_mm / 1000.0;
    (meters, base + meters)
}

fn subtype(class: Class) -> Option<BuildingSubtype> {
    match class {
        Class::Building(subtype) => Some(subtype),
        _ => None,
    }
}

/// `"way/123"` for the first piece, `"way/123#2"` for later ones.
pub fn overlay_id(kind: ElementKind, id: i64, part: u32) -> String {
    if part == 0 {
        format!("{}/{}", kind, id)
    } else {
        format!("{}/{}#{}", kind, id, part)
    }
}
