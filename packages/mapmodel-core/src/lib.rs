//! Acquisition and conversion core for 3D map models: tiles an area of
//! interest, fetches OpenStreetMap data from Overpass and turns it into
//! extrudable polygons plus a GeoJSON overlay.

// Create a console module for logging
pub mod console;
pub mod error;
pub mod models;
// Road and waterway widths
pub mod widths;
pub mod polygon;
pub mod tiling;
pub mod query;
pub mod cache;
pub mod cache_keys;
pub mod retry;
// Overpass client
pub mod upstream;
pub mod buffer;
pub mod classify;
pub mod convert;
pub mod request;
pub mod config;
pub mod pipeline;

#[cfg(test)]
mod testing;

// Use the macro from our console module
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

pub use config::{CacheConfig, PipelineConfig};
pub use convert::{ConvertParams, Converter};
pub use error::{ErrorBody, ModelError, Result, UpstreamError};
pub use models::{
    Area, BBox, ConvertedFeature, ElementType, FeatureType, GeneratorOptions, ModelResult, Tags,
};
pub use pipeline::{ModelResponse, Pipeline, ResponseMeta};
pub use request::{parse_request, ModelParams, ModelRequest};
pub use upstream::{ClientConfig, UpstreamClient};
pub use widths::WidthTable;
