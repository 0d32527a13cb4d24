//! Pure tag classification. First match wins.

use crate::models::{BuildingSubtype, ElementType, FeatureType, GeneratorOptions, Tags};

const DEFAULT_BUILDING_HEIGHT_M: f64 = 10.0;
const METERS_PER_LEVEL: f64 = 3.0;

const RESIDENTIAL: [&str; 8] = [
    "house",
    "residential",
    "apartments",
    "detached",
    "terrace",
    "semidetached_house",
    "dormitory",
    "hotel",
];
const COMMERCIAL: [&str; 3] = ["retail", "commercial", "office"];
const INDUSTRIAL: [&str; 3] = ["industrial", "warehouse", "factory"];
const FOOTPATHS: [&str; 5] = ["footway", "path", "pedestrian", "cycleway", "steps"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Building(BuildingSubtype),
    Road,
    Waterway,
    Water,
    Sand,
    Pier,
    Green,
}

impl Class {
    pub fn feature_type(&self) -> FeatureType {
        match self {
            Class::Building(_) => FeatureType::Building,
            Class::Road => FeatureType::Road,
            Class::Waterway | Class::Water => FeatureType::Water,
            Class::Sand => FeatureType::Sand,
            Class::Pier => FeatureType::Pier,
            Class::Green => FeatureType::Green,
        }
    }

    /// The requested element type that brings this class in.
    pub fn element_type(&self) -> ElementType {
        match self {
            Class::Building(_) => ElementType::Buildings,
            Class::Road => ElementType::Roads,
            Class::Waterway | Class::Water | Class::Sand | Class::Pier => ElementType::Water,
            Class::Green => ElementType::Green,
        }
    }
}

/// Classify an element by its tags. `None` means the element is dropped:
/// nothing matched, the class is switched off, or its element type was not
/// requested.
pub fn classify(tags: &Tags, options: &GeneratorOptions) -> Option<Class> {
    let class = match_class(tags, options)?;
    options
        .elements
        .contains(&class.element_type())
        .then_some(class)
}

fn match_class(tags: &Tags, options: &GeneratorOptions) -> Option<Class> {
    if tags.has("building") {
        return Some(Class::Building(building_subtype(tags)));
    }
    if let Some(highway) = tags.get("highway") {
        if !options.footpath_roads_enabled && FOOTPATHS.contains(&highway) {
            return None;
        }
        return Some(Class::Road);
    }
    if tags.has("waterway") {
        return Some(Class::Waterway);
    }
    if tags.is("natural", "water") {
        let sea = matches!(tags.get("water"), Some("sea") | Some("ocean"));
        if sea && !options.ocean_enabled {
            return None;
        }
        return Some(Class::Water);
    }
    if options.beach_enabled && matches!(tags.get("natural"), Some("sand") | Some("beach")) {
        return Some(Class::Sand);
    }
    if options.piers_enabled && tags.is("man_made", "pier") {
        return Some(Class::Pier);
    }
    if tags.is("leisure", "park") || tags.is("landuse", "grass") {
        return Some(Class::Green);
    }
    None
}

pub fn building_subtype(tags: &Tags) -> BuildingSubtype {
    let class = tags.get("building").unwrap_or_default().to_ascii_lowercase();
    let has_value = |key: &str| tags.get(key).is_some_and(|v| !v.is_empty());

    if INDUSTRIAL.contains(&class.as_str()) {
        BuildingSubtype::Industrial
    } else if COMMERCIAL.contains(&class.as_str()) || has_value("amenity") || has_value("shop") {
        BuildingSubtype::Commercial
    } else if RESIDENTIAL.contains(&class.as_str()) {
        BuildingSubtype::Residential
    } else {
        BuildingSubtype::Generic
    }
}

/// Leading number of a tag value such as `"12.5 m"`.
fn numeric_prefix(value: &str) -> Option<f64> {
    let value = value.trim_start();
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    value[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Raw building height in meters: `height`, else `building:levels * 3`,
/// else 10 m.
pub fn building_height_m(tags: &Tags) -> f64 {
    if let Some(height) = tags.get("height").and_then(numeric_prefix) {
        return height;
    }
    if let Some(levels) = tags.get("building:levels").and_then(numeric_prefix) {
        return levels * METERS_PER_LEVEL;
    }
    DEFAULT_BUILDING_HEIGHT_M
}
