//! Validation of the model endpoint's JSON body into pipeline parameters.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::buffer::buffer_line;
use crate::convert::ConvertParams;
use crate::error::{ModelError, Result};
use crate::models::{Area, BBox, ElementType, GeneratorOptions, LonLat};
use crate::polygon::{close_ring, parse_coordinate, parse_polygon, ring_area_m2};

/// Request body as sent by the client. Everything is optional here;
/// `validate` decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub scale: Option<f64>,
    pub base_height: Option<f64>,
    pub building_multiplier: Option<f64>,
    pub elements: Option<Vec<ElementType>>,
    pub bbox: Option<Vec<f64>>,
    pub shape: Option<Value>,
    pub route: Option<Value>,
    pub route_buffer_meters: Option<f64>,
    pub clip_to_shape: Option<bool>,
    pub min_area: Option<f64>,
    #[serde(rename = "minBuildingHeightMM")]
    pub min_building_height_mm: Option<f64>,
    #[serde(rename = "waterHeightMM")]
    pub water_height_mm: Option<f64>,
    #[serde(rename = "greeneryHeightMM")]
    pub greenery_height_mm: Option<f64>,
    #[serde(rename = "beachHeightMM")]
    pub beach_height_mm: Option<f64>,
    #[serde(rename = "pierHeightMM")]
    pub pier_height_mm: Option<f64>,
    #[serde(rename = "minWaterAreaM2")]
    pub min_water_area_m2: Option<f64>,
    pub footpath_roads_enabled: Option<bool>,
    pub ocean_enabled: Option<bool>,
    pub beach_enabled: Option<bool>,
    pub piers_enabled: Option<bool>,
    pub custom_road_widths: Option<BTreeMap<String, f64>>,
    pub custom_waterway_widths: Option<BTreeMap<String, f64>>,
    pub invalidate: Option<bool>,
}

/// Validated parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub area: Area,
    pub convert: ConvertParams,
    pub options: GeneratorOptions,
    pub invalidate: bool,
}

impl ModelRequest {
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| ModelError::validation(format!("invalid JSON: {e}")))
    }

    /// Check required fields and fill defaults. Area precedence is
    /// shape, then route, then bbox.
    pub fn validate(self, default_route_buffer_m: f64) -> Result<ModelParams> {
        let scale = self
            .scale
            .filter(|s| s.is_finite() && *s > 0.0)
            .ok_or_else(|| ModelError::validation("scale must be a positive number"))?;
        let base_height = finite_or("baseHeight", self.base_height, 0.0)?;
        let building_multiplier = finite_or("buildingMultiplier", self.building_multiplier, 1.0)?;

        let elements = match self.elements {
            Some(elements) if !elements.is_empty() => elements.into_iter().collect(),
            _ => return Err(ModelError::validation("elements must be a non-empty array")),
        };

        let area = if let Some(shape) = &self.shape {
            let ring = parse_polygon(shape)
                .ok_or_else(|| ModelError::validation("invalid shape polygon"))?;
            Area::Polygon(ring)
        } else if let Some(route) = &self.route {
            let buffer_m = self.route_buffer_meters.unwrap_or(default_route_buffer_m);
            Area::Polygon(route_corridor(route, buffer_m)?)
        } else if let Some(bbox) = &self.bbox {
            Area::BBox(parse_bbox(bbox)?)
        } else {
            return Err(ModelError::validation("one of shape, route or bbox is required"));
        };

        let defaults = GeneratorOptions::default();
        let options = GeneratorOptions {
            elements,
            min_building_area_m2: non_negative_or(
                "minArea",
                self.min_area,
                defaults.min_building_area_m2,
            )?,
            min_building_height_mm: non_negative_or(
                "minBuildingHeightMM",
                self.min_building_height_mm,
                defaults.min_building_height_mm,
            )?,
            water_height_mm: non_negative_or(
                "waterHeightMM",
                self.water_height_mm,
                defaults.water_height_mm,
            )?,
            greenery_height_mm: non_negative_or(
                "greeneryHeightMM",
                self.greenery_height_mm,
                defaults.greenery_height_mm,
            )?,
            beach_height_mm: non_negative_or(
                "beachHeightMM",
                self.beach_height_mm,
                defaults.beach_height_mm,
            )?,
            pier_height_mm: non_negative_or(
                "pierHeightMM",
                self.pier_height_mm,
                defaults.pier_height_mm,
            )?,
            min_water_area_m2: non_negative_or(
                "minWaterAreaM2",
                self.min_water_area_m2,
                defaults.min_water_area_m2,
            )?,
            footpath_roads_enabled: self
                .footpath_roads_enabled
                .unwrap_or(defaults.footpath_roads_enabled),
            ocean_enabled: self.ocean_enabled.unwrap_or(defaults.ocean_enabled),
            beach_enabled: self.beach_enabled.unwrap_or(defaults.beach_enabled),
            piers_enabled: self.piers_enabled.unwrap_or(defaults.piers_enabled),
            clip_to_shape: self.clip_to_shape.unwrap_or(defaults.clip_to_shape),
            custom_road_widths: self.custom_road_widths.unwrap_or_default(),
            custom_waterway_widths: self.custom_waterway_widths.unwrap_or_default(),
        };

        Ok(ModelParams {
            area,
            convert: ConvertParams {
                scale,
                base_height,
                building_multiplier,
            },
            options,
            invalidate: self.invalidate.unwrap_or(false),
        })
    }
}

/// Parse and validate a request body in one go.
pub fn parse_request(body: &str, default_route_buffer_m: f64) -> Result<ModelParams> {
    ModelRequest::from_json(body)?.validate(default_route_buffer_m)
}

fn finite_or(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
    match value {
        None => Ok(default),
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(ModelError::validation(format!("{name} must be a finite number"))),
    }
}

fn non_negative_or(name: &str, value: Option<f64>, default: f64) -> Result<f64> {
    let v = finite_or(name, value, default)?;
    if v < 0.0 {
        return Err(ModelError::validation(format!("{name} must not be negative")));
    }
    Ok(v)
}

fn parse_bbox(values: &[f64]) -> Result<BBox> {
    let [west, south, east, north] = values else {
        return Err(ModelError::validation("bbox must have four numbers"));
    };
    let bbox = BBox::new(*west, *south, *east, *north);
    let finite = values.iter().all(|v| v.is_finite());
    if !finite || bbox.west > bbox.east || bbox.south > bbox.north {
        return Err(ModelError::validation("bbox must be [west, south, east, north]"));
    }
    Ok(bbox)
}

/// Route polyline from a GeoJSON `LineString` or a bare coordinate list.
fn parse_route(input: &Value) -> Option<Vec<LonLat>> {
    let coords = match input {
        Value::Object(map) if map.get("type").and_then(Value::as_str) == Some("LineString") => {
            map.get("coordinates")?
        }
        Value::Array(_) => input,
        _ => return None,
    };
    let points = coords
        .as_array()?
        .iter()
        .map(parse_coordinate)
        .collect::<Option<Vec<LonLat>>>()?;
    (points.len() >= 2).then_some(points)
}

/// Corridor polygon `buffer_m` meters either side of the route.
fn route_corridor(route: &Value, buffer_m: f64) -> Result<Vec<LonLat>> {
    let points = parse_route(route).ok_or_else(|| ModelError::validation("invalid route"))?;
    if !buffer_m.is_finite() || buffer_m <= 0.0 {
        return Err(ModelError::validation("routeBufferMeters must be positive"));
    }
    buffer_line(&points, buffer_m * 2.0)
        .into_iter()
        .max_by(|a, b| ring_area_m2(a).total_cmp(&ring_area_m2(b)))
        .map(close_ring)
        .ok_or_else(|| ModelError::validation("route is too short to buffer"))
}
