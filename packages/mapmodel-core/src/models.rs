// This is the models module containing shared data structures
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};

/// A `[lon, lat]` pair in degrees.
pub type LonLat = [f64; 2];

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.east <= self.west || self.north <= self.south
    }

    /// Closed counter-clockwise ring around the box.
    pub fn ring(&self) -> Vec<LonLat> {
        vec![
            [self.west, self.south],
            [self.east, self.south],
            [self.east, self.north],
            [self.west, self.north],
            [self.west, self.south],
        ]
    }
}

/// The region a request asks for. A polygon ring is always closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Area {
    BBox(BBox),
    Polygon(Vec<LonLat>),
}

impl Area {
    pub fn bbox(&self) -> BBox {
        match self {
            Area::BBox(bbox) => *bbox,
            Area::Polygon(ring) => crate::polygon::ring_bbox(ring),
        }
    }

    pub fn ring(&self) -> Vec<LonLat> {
        match self {
            Area::BBox(bbox) => bbox.ring(),
            Area::Polygon(ring) => ring.clone(),
        }
    }

    pub fn polygon(&self) -> Option<&[LonLat]> {
        match self {
            Area::Polygon(ring) => Some(ring),
            Area::BBox(_) => None,
        }
    }
}

/// Upstream tag dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Tags(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// True when `key` is present with exactly `value`.
    pub fn is(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        };
        f.write_str(name)
    }
}

/// One upstream record, ready for conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub kind: ElementKind,
    pub id: i64,
    pub tags: Tags,
    pub geometry: Vec<LonLat>,
}

impl RawElement {
    pub fn is_closed(&self) -> bool {
        self.geometry.len() >= 4 && self.geometry.first() == self.geometry.last()
    }
}

/// Element classes a request can ask for. The derive order is the order in
/// which query clauses are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Buildings,
    Roads,
    Water,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Building,
    Road,
    Water,
    Green,
    Sand,
    Pier,
    Other,
}

impl FeatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::Building => "building",
            FeatureType::Road => "road",
            FeatureType::Water => "water",
            FeatureType::Green => "green",
            FeatureType::Sand => "sand",
            FeatureType::Pier => "pier",
            FeatureType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingSubtype {
    #[serde(rename = "building_residential")]
    Residential,
    #[serde(rename = "building_commercial")]
    Commercial,
    #[serde(rename = "building_industrial")]
    Industrial,
    #[serde(rename = "building_generic")]
    Generic,
}

impl BuildingSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildingSubtype::Residential => "building_residential",
            BuildingSubtype::Commercial => "building_commercial",
            BuildingSubtype::Industrial => "building_industrial",
            BuildingSubtype::Generic => "building_generic",
        }
    }
}

/// Request-scoped switches and dimensions for fetching and conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorOptions {
    pub elements: BTreeSet<ElementType>,
    pub min_building_area_m2: f64,
    pub min_building_height_mm: f64,
    pub water_height_mm: f64,
    pub greenery_height_mm: f64,
    pub beach_height_mm: f64,
    pub pier_height_mm: f64,
    pub min_water_area_m2: f64,
    pub footpath_roads_enabled: bool,
    pub ocean_enabled: bool,
    pub beach_enabled: bool,
    pub piers_enabled: bool,
    pub clip_to_shape: bool,
    pub custom_road_widths: BTreeMap<String, f64>,
    pub custom_waterway_widths: BTreeMap<String, f64>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            elements: BTreeSet::from([
                ElementType::Buildings,
                ElementType::Roads,
                ElementType::Water,
                ElementType::Green,
            ]),
            min_building_area_m2: 0.0,
            min_building_height_mm: 0.0,
            water_height_mm: 100.0,
            greenery_height_mm: 100.0,
            beach_height_mm: 100.0,
            pier_height_mm: 100.0,
            min_water_area_m2: 0.0,
            footpath_roads_enabled: true,
            ocean_enabled: true,
            beach_enabled: false,
            piers_enabled: false,
            clip_to_shape: false,
            custom_road_widths: BTreeMap::new(),
            custom_waterway_widths: BTreeMap::new(),
        }
    }
}

/// Identity used when merging features from several tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureKey {
    pub osm_type: ElementKind,
    pub id: i64,
    pub part: u32,
}

/// A classified polygon in local model coordinates
/// (`[lon * scale, base_height, lat * scale]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedFeature {
    pub id: i64,
    pub osm_type: ElementKind,
    pub part: u32,
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subtype: Option<BuildingSubtype>,
    pub geometry: Vec<[f64; 3]>,
    pub height: f64,
}

impl ConvertedFeature {
    pub fn key(&self) -> FeatureKey {
        FeatureKey {
            osm_type: self.osm_type,
            id: self.id,
            part: self.part,
        }
    }
}

/// Converter output for one tile or a whole merged request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub features: Vec<ConvertedFeature>,
    pub geojson: FeatureCollection,
}

impl ModelResult {
    pub fn new(features: Vec<ConvertedFeature>, overlay: Vec<geojson::Feature>) -> Self {
        Self {
            features,
            geojson: FeatureCollection {
                bbox: None,
                features: overlay,
                foreign_members: None,
            },
        }
    }
}
