use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheOptions;
use crate::upstream::ClientConfig;

/// Everything the pipeline needs that does not come from a request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub client: ClientConfig,
    pub max_area_km2: f64,
    pub tile_deg: f64,
    /// Largest tile grid one request may expand into.
    pub max_tiles: usize,
    pub route_buffer_m: f64,
    pub tile_cache: CacheConfig,
    pub model_cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub file: Option<PathBuf>,
}

impl CacheConfig {
    pub fn options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            max_entries: self.max_entries,
            persist_file: self.file.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            max_area_km2: 25.0,
            tile_deg: 0.05,
            max_tiles: 400,
            route_buffer_m: 75.0,
            tile_cache: CacheConfig {
                ttl: Duration::from_millis(86_400_000),
                max_entries: 500,
                file: None,
            },
            model_cache: CacheConfig {
                ttl: Duration::from_millis(3_600_000),
                max_entries: 200,
                file: None,
            },
        }
    }
}

impl PipelineConfig {
    /// Read overrides from the process environment. Missing or unparseable
    /// values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).and_then(|v| v.trim().parse::<f64>().ok());
        let number = |name: &str, fallback: f64| {
            parse(name).filter(|v| v.is_finite()).unwrap_or(fallback)
        };
        let count = |name: &str, fallback: usize| {
            env_parse::<usize>(&lookup, name).unwrap_or(fallback)
        };
        let millis = |name: &str, fallback: Duration| {
            env_parse::<u64>(&lookup, name)
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        let path = |name: &str| lookup(name).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

        let endpoints = lookup("OVERPASS_ENDPOINTS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.client.endpoints);

        let client = ClientConfig {
            endpoints,
            timeout: millis("OVERPASS_TIMEOUT_MS", defaults.client.timeout),
            max_retries: env_parse::<u32>(&lookup, "OVERPASS_MAX_RETRIES")
                .unwrap_or(defaults.client.max_retries),
            retry_base: millis("OVERPASS_RETRY_BASE_MS", defaults.client.retry_base),
            concurrency: count("OVERPASS_CONCURRENCY", defaults.client.concurrency).max(1),
            user_agent: lookup("OVERPASS_USER_AGENT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.client.user_agent),
        };

        Self {
            client,
            max_area_km2: number("OVERPASS_MAX_AREA_KM2", defaults.max_area_km2),
            tile_deg: number("OVERPASS_TILE_DEG", defaults.tile_deg),
            max_tiles: count("OVERPASS_MAX_TILES", defaults.max_tiles).max(1),
            route_buffer_m: number("ROUTE_BUFFER_METERS", defaults.route_buffer_m),
            tile_cache: CacheConfig {
                ttl: millis("MODEL_TILE_CACHE_TTL_MS", defaults.tile_cache.ttl),
                max_entries: count("MODEL_TILE_CACHE_MAX_ENTRIES", defaults.tile_cache.max_entries),
                file: path("MODEL_TILE_CACHE_FILE"),
            },
            model_cache: CacheConfig {
                ttl: millis("MODEL_CACHE_TTL_MS", defaults.model_cache.ttl),
                max_entries: count("MODEL_CACHE_MAX_ENTRIES", defaults.model_cache.max_entries),
                file: path("MODEL_CACHE_FILE"),
            },
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse::<T>().ok())
}
