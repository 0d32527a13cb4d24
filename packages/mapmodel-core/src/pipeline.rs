//! Ties tiling, caching, fetching and conversion together for one request.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheStats};
use crate::cache_keys::{make_params_key, make_request_key, make_tile_key};
use crate::config::PipelineConfig;
use crate::console_log;
use crate::convert::Converter;
use crate::error::{ModelError, Result};
use crate::models::{BBox, ConvertedFeature, FeatureKey, GeneratorOptions, LonLat, ModelResult};
use crate::query::{build_query, AreaFilter};
use crate::request::{parse_request, ModelParams};
use crate::tiling::decide_tiles;
use crate::upstream::{FetchMeta, UpstreamClient};
use crate::widths::WidthTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub tiles: usize,
    pub tiles_from_cache: usize,
    pub from_cache: bool,
    pub polygon_filter: bool,
    pub area_km2: f64,
    pub upstream: Vec<FetchMeta>,
    pub feature_count: usize,
    pub overlay_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub features: Vec<ConvertedFeature>,
    pub geojson: FeatureCollection,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub tiles: CacheStats,
    pub models: CacheStats,
}

struct TileOutcome {
    result: ModelResult,
    from_cache: bool,
    meta: Option<FetchMeta>,
}

/// Per-request inputs shared by every tile. The owned parts move into the
/// blocking conversion task.
struct TileContext<'a> {
    params: &'a ModelParams,
    params_key: &'a str,
    widths: Arc<WidthTable>,
    options: Arc<GeneratorOptions>,
    /// Polygon sent upstream as the query filter.
    query_polygon: Option<&'a [LonLat]>,
    /// Request polygon, used for clipping and filtering after conversion.
    area_polygon: Option<Arc<[LonLat]>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    client: UpstreamClient,
    widths: WidthTable,
    tile_cache: Cache<ModelResult>,
    model_cache: Cache<ModelResponse>,
}

impl Pipeline {
    /// Build the pipeline, loading both cache snapshots if configured.
    pub async fn new(config: PipelineConfig) -> Self {
        let client = UpstreamClient::new(config.client.clone());
        Self::with_client(config, client).await
    }

    pub async fn with_client(config: PipelineConfig, client: UpstreamClient) -> Self {
        let tile_cache = Cache::open(config.tile_cache.options()).await;
        let model_cache = Cache::open(config.model_cache.options()).await;
        Self::with_parts(config, client, tile_cache, model_cache)
    }

    pub fn with_parts(
        config: PipelineConfig,
        client: UpstreamClient,
        tile_cache: Cache<ModelResult>,
        model_cache: Cache<ModelResponse>,
    ) -> Self {
        Self {
            config,
            client,
            widths: WidthTable::default(),
            tile_cache,
            model_cache,
        }
    }

    /// Replace the base width table that request overrides merge onto.
    pub fn with_widths(mut self, widths: WidthTable) -> Self {
        self.widths = widths;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            tiles: self.tile_cache.stats(),
            models: self.model_cache.stats(),
        }
    }

    /// Parse a JSON request body and run it.
    pub async fn handle(&self, body: &str) -> Result<ModelResponse> {
        let params = parse_request(body, self.config.route_buffer_m)?;
        self.run(&params).await
    }

    pub async fn run(&self, params: &ModelParams) -> Result<ModelResponse> {
        let start = Instant::now();
        let params_key = make_params_key(&(&params.convert, &params.options));
        let request_key = make_request_key(&params.area, &params_key);

        if !params.invalidate {
            if let Some(mut cached) = self.model_cache.get(&request_key).await {
                cached.meta.from_cache = true;
                cached.meta.duration_ms = start.elapsed().as_millis() as u64;
                console_log!("model: served {} features from cache", cached.features.len());
                return Ok(cached);
            }
        }

        let plan = decide_tiles(
            &params.area,
            self.config.max_area_km2,
            self.config.tile_deg,
            self.config.max_tiles,
        )?;
        debug!(
            "model: {:.2} km2 in {} tile(s), polygon filter {}",
            plan.area_km2,
            plan.tiles.len(),
            plan.use_polygon_filter
        );

        let widths = self.widths.with_overrides(
            &params.options.custom_road_widths,
            &params.options.custom_waterway_widths,
        );
        let area_polygon = params.area.polygon();
        let context = TileContext {
            params,
            params_key: &params_key,
            widths: Arc::new(widths),
            options: Arc::new(params.options.clone()),
            query_polygon: area_polygon.filter(|_| plan.use_polygon_filter),
            area_polygon: area_polygon.map(Arc::from),
        };

        let outcomes = join_all(plan.tiles.iter().map(|tile| self.load_tile(tile, &context))).await;
        let mut tiles = Vec::with_capacity(outcomes.len());
        for (tile, outcome) in plan.tiles.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => tiles.push(outcome),
                Err(err) => {
                    warn!("model: tile {:?} failed: {}", tile, err);
                    return Err(err);
                }
            }
        }

        let tiles_from_cache = tiles.iter().filter(|t| t.from_cache).count();
        let upstream: Vec<FetchMeta> = tiles.iter().filter_map(|t| t.meta.clone()).collect();
        let merged = merge_results(tiles.into_iter().map(|t| t.result));

        let response = ModelResponse {
            meta: ResponseMeta {
                tiles: plan.tiles.len(),
                tiles_from_cache,
                from_cache: false,
                polygon_filter: plan.use_polygon_filter,
                area_km2: plan.area_km2,
                upstream,
                feature_count: merged.features.len(),
                overlay_count: merged.geojson.features.len(),
                duration_ms: start.elapsed().as_millis() as u64,
            },
            features: merged.features,
            geojson: merged.geojson,
        };

        console_log!(
            "model: {} tiles ({} cached), {} features in {} ms",
            response.meta.tiles,
            response.meta.tiles_from_cache,
            response.meta.feature_count,
            response.meta.duration_ms
        );
        self.model_cache.set(request_key, response.clone()).await;
        Ok(response)
    }

    async fn load_tile(&self, tile: &BBox, ctx: &TileContext<'_>) -> Result<TileOutcome> {
        let params = ctx.params;
        let key = make_tile_key(tile, ctx.area_polygon.as_deref(), ctx.params_key);

        if !params.invalidate {
            if let Some(result) = self.tile_cache.get(&key).await {
                debug!("model: tile cache hit {}", key);
                return Ok(TileOutcome {
                    result,
                    from_cache: true,
                    meta: None,
                });
            }
        }

        let filter = match ctx.query_polygon {
            Some(ring) => AreaFilter::polygon(ring),
            None => AreaFilter::bbox(tile),
        };
        let query = build_query(&params.options.elements, filter, &params.options);
        let reply = self.client.fetch(&query).await?;

        let data = Arc::clone(&reply.data);
        let widths = Arc::clone(&ctx.widths);
        let options = Arc::clone(&ctx.options);
        let convert = params.convert;
        let clip = ctx.area_polygon.clone();
        // Tiles fetched by bbox may hold features outside the request polygon
        let area_filter = clip.clone().filter(|_| ctx.query_polygon.is_none());
        let (element_count, result) = tokio::task::spawn_blocking(move || {
            let elements = data.raw_elements();
            let result = Converter::new(&widths, &options, convert)
                .with_clip(clip.as_deref())
                .with_area_filter(area_filter.as_deref())
                .convert(&elements);
            (elements.len(), result)
        })
        .await
        .map_err(|e| ModelError::Internal(format!("conversion task failed: {e}")))?;

        debug!(
            "model: tile {} -> {} elements, {} features",
            key,
            element_count,
            result.features.len()
        );
        self.tile_cache.set(key, result.clone()).await;
        Ok(TileOutcome {
            result,
            from_cache: false,
            meta: Some(reply.meta),
        })
    }
}

/// Merge tile results in order. Features are keyed by
/// `(osmType, id, part)`; overlay features by feature id, then
/// `properties.id`, then a random key. The first occurrence wins.
pub fn merge_results(results: impl IntoIterator<Item = ModelResult>) -> ModelResult {
    let mut seen: HashSet<FeatureKey> = HashSet::new();
    let mut overlay_seen: HashSet<String> = HashSet::new();
    let mut features = Vec::new();
    let mut overlay = Vec::new();

    for result in results {
        for feature in result.features {
            if seen.insert(feature.key()) {
                features.push(feature);
            }
        }
        for feature in result.geojson.features {
            if overlay_seen.insert(overlay_key(&feature)) {
                overlay.push(feature);
            }
        }
    }

    ModelResult::new(features, overlay)
}

fn overlay_key(feature: &Feature) -> String {
    match &feature.id {
        Some(Id::String(id)) => return id.clone(),
        Some(Id::Number(id)) => return id.to_string(),
        None => {}
    }
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get("id"))
        .filter(|id| !id.is_null())
        .map(|id| format!("prop:{}", id))
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
