//! Overpass client: retries over a rotating endpoint pool, a per-attempt
//! timeout, a FIFO concurrency gate and de-duplication of identical queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::UpstreamError;
use crate::models::{ElementKind, LonLat, RawElement, Tags};
use crate::retry::{with_retry, RetryPolicy};

pub const DEFAULT_ENDPOINTS: [&str; 2] = [
    "https://overpass-api.de/api/interpreter",
    "https://overpass.kumi.systems/api/interpreter",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoints: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            timeout: Duration::from_millis(30_000),
            max_retries: 2,
            retry_base: Duration::from_millis(500),
            concurrency: 1,
            user_agent: format!("mapmodel-core/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one query to one endpoint. `Err` carries a network-level failure
/// message; HTTP error statuses are returned as responses.
pub trait Transport: Send + Sync + 'static {
    fn post<'a>(
        &'a self,
        endpoint: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<TransportResponse, String>>;
}

/// Production transport: POSTs the query as form field `data`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.into(),
        }
    }
}

impl Transport for ReqwestTransport {
    fn post<'a>(
        &'a self,
        endpoint: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<TransportResponse, String>> {
        async move {
            let response = self
                .client
                .post(endpoint)
                .header(USER_AGENT, self.user_agent.as_str())
                .form(&[("data", query)])
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| e.to_string())?;
            Ok(TransportResponse { status, body })
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub id: i64,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub geometry: Vec<Option<GeoPoint>>,
    #[serde(default)]
    pub members: Vec<OverpassMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverpassMember {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub geometry: Vec<Option<GeoPoint>>,
}

fn points(geometry: &[Option<GeoPoint>]) -> Vec<LonLat> {
    geometry.iter().flatten().map(|p| [p.lon, p.lat]).collect()
}

impl OverpassResponse {
    /// Flatten the response into convertible elements. Ways map one to one;
    /// relations yield one element per assembled outer ring, all sharing the
    /// relation id and tags. Inner members are dropped, so holes stay
    /// filled. Nodes carry no geometry and are skipped.
    pub fn raw_elements(&self) -> Vec<RawElement> {
        let mut out = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match element.kind {
                ElementKind::Way => {
                    let geometry = points(&element.geometry);
                    if geometry.len() >= 2 {
                        out.push(RawElement {
                            kind: ElementKind::Way,
                            id: element.id,
                            tags: element.tags.clone(),
                            geometry,
                        });
                    }
                }
                ElementKind::Relation => {
                    let segments = element
                        .members
                        .iter()
                        .filter(|m| m.kind == ElementKind::Way)
                        .filter(|m| m.role == "outer" || m.role.is_empty())
                        .map(|m| points(&m.geometry))
                        .collect();
                    for ring in assemble_rings(segments) {
                        out.push(RawElement {
                            kind: ElementKind::Relation,
                            id: element.id,
                            tags: element.tags.clone(),
                            geometry: ring,
                        });
                    }
                }
                ElementKind::Node => {}
            }
        }
        out
    }
}

/// Join open member ways end to end into rings. Segments that cannot be
/// closed are returned open and left for the converter to reject.
fn assemble_rings(mut segments: Vec<Vec<LonLat>>) -> Vec<Vec<LonLat>> {
    segments.retain(|s| s.len() >= 2);
    segments.reverse();
    let mut rings = Vec::new();
    while let Some(mut ring) = segments.pop() {
        loop {
            if ring.len() >= 4 && ring.first() == ring.last() {
                break;
            }
            let Some(end) = ring.last().copied() else {
                break;
            };
            let next = segments
                .iter()
                .position(|s| s.first() == Some(&end) || s.last() == Some(&end));
            let Some(index) = next else {
                break;
            };
            let mut segment = segments.remove(index);
            if segment.first() != Some(&end) {
                segment.reverse();
            }
            ring.extend(segment.into_iter().skip(1));
        }
        rings.push(ring);
    }
    rings
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchMeta {
    pub endpoint_used: String,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub data: Arc<OverpassResponse>,
    pub meta: FetchMeta,
}

type SharedFetch = Shared<BoxFuture<'static, Result<UpstreamReply, UpstreamError>>>;

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    cursor: AtomicUsize,
    gate: Semaphore,
    inflight: Mutex<HashMap<String, SharedFetch>>,
}

/// Cheap to clone; clones share the endpoint cursor, the gate and the
/// in-flight table.
#[derive(Clone)]
pub struct UpstreamClient {
    inner: Arc<Inner>,
}

impl UpstreamClient {
    pub fn new(config: ClientConfig) -> Self {
        let transport = ReqwestTransport::new(config.user_agent.clone());
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                cursor: AtomicUsize::new(0),
                gate: Semaphore::new(permits),
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Number of distinct queries currently being fetched.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.lock().len()
    }

    /// Fetch `query`, sharing the call with any identical query already in
    /// flight. The call runs on its own task, so dropping this future does
    /// not cancel it for other callers.
    pub async fn fetch(&self, query: &str) -> Result<UpstreamReply, UpstreamError> {
        let shared = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(query) {
                Some(existing) => {
                    debug!("overpass: joining in-flight query");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let key = query.to_string();
                    let handle = tokio::spawn(async move {
                        let outcome = inner.run(&key).await;
                        inner.inflight.lock().remove(&key);
                        outcome
                    });
                    let shared = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(UpstreamError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    inflight.insert(query.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }
}

impl Inner {
    async fn run(&self, query: &str) -> Result<UpstreamReply, UpstreamError> {
        if self.config.endpoints.is_empty() {
            return Err(UpstreamError::NoEndpoints);
        }
        // Held for the whole retry loop of this logical fetch
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| UpstreamError::Aborted(e.to_string()))?;

        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_base);
        let retried = with_retry(&policy, |attempt| self.attempt(query, attempt)).await?;
        let (data, endpoint_used) = retried.result;

        debug!(
            "overpass: {} elements from {} after {} attempt(s)",
            data.elements.len(),
            endpoint_used,
            retried.attempts
        );
        Ok(UpstreamReply {
            data: Arc::new(data),
            meta: FetchMeta {
                endpoint_used,
                attempts: retried.attempts,
                duration_ms: retried.duration.as_millis() as u64,
            },
        })
    }

    async fn attempt(
        &self,
        query: &str,
        attempt: u32,
    ) -> Result<(OverpassResponse, String), UpstreamError> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.config.endpoints.len();
        let endpoint = self.config.endpoints[index].clone();
        debug!("overpass: attempt {} via {}", attempt + 1, endpoint);

        let call = self.transport.post(&endpoint, query);
        let response = match tokio::time::timeout(self.config.timeout, call).await {
            Err(_) => {
                return Err(UpstreamError::Timeout {
                    endpoint,
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
            Ok(Err(message)) => return Err(UpstreamError::Network { endpoint, message }),
            Ok(Ok(response)) => response,
        };

        if !(200..300).contains(&response.status) {
            return Err(UpstreamError::Http {
                endpoint,
                status: response.status,
            });
        }

        match serde_json::from_str(&response.body) {
            Ok(data) => Ok((data, endpoint)),
            Err(e) => Err(UpstreamError::Parse {
                endpoint,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, status, FakeTransport};

    fn config(endpoints: &[&str]) -> ClientConfig {
        ClientConfig {
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            timeout: Duration::from_millis(1_000),
            max_retries: 2,
            retry_base: Duration::from_millis(500),
            concurrency: 1,
            user_agent: "test".into(),
        }
    }

    const EMPTY: &str = r#"{"elements":[]}"#;

    #[tokio::test(start_paused = true)]
    async fn rotates_to_the_next_endpoint_after_a_503() {
        let transport = Arc::new(FakeTransport::scripted(vec![status(503), ok(EMPTY)]));
        let client =
            UpstreamClient::with_transport(config(&["https://a", "https://b"]), transport.clone());

        let reply = client.fetch("q").await.unwrap();
        assert_eq!(reply.meta.attempts, 2);
        assert_eq!(reply.meta.endpoint_used, "https://b");
        assert_eq!(transport.endpoints(), vec!["https://a", "https://b"]);
        assert_eq!(client.inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_concurrent_queries_share_one_call() {
        let transport = Arc::new(
            FakeTransport::scripted(vec![ok(EMPTY), ok(EMPTY)])
                .with_delay(Duration::from_millis(50)),
        );
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let (a, b) = tokio::join!(client.fetch("same"), client.fetch("same"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(client.inflight(), 0);

        // Settled entries are gone, so the next call goes upstream again
        client.fetch("same").await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_caller_does_not_cancel_the_shared_call() {
        let transport = Arc::new(
            FakeTransport::scripted(vec![ok(EMPTY)]).with_delay(Duration::from_millis(50)),
        );
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let first = client.clone();
        let abandoned = tokio::spawn(async move { first.fetch("q").await });
        tokio::task::yield_now().await;
        let second = client.fetch("q");
        abandoned.abort();

        assert!(second.await.is_ok());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_then_surfaces() {
        let transport =
            Arc::new(FakeTransport::scripted(vec![status(429), status(429), status(429)]));
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let err = client.fetch("q").await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_client_errors_are_fatal() {
        let transport = Arc::new(FakeTransport::scripted(vec![status(400), ok(EMPTY)]));
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let err = client.fetch("q").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_endpoints_time_out_as_504() {
        let transport = Arc::new(
            FakeTransport::scripted(vec![ok(EMPTY)]).with_delay(Duration::from_millis(5_000)),
        );
        let mut cfg = config(&["https://slow"]);
        cfg.max_retries = 0;
        let client = UpstreamClient::with_transport(cfg, transport);

        let err = client.fetch("q").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { timeout_ms: 1_000, .. }));
        assert_eq!(err.status(), Some(504));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_bounds_concurrent_calls() {
        let transport = Arc::new(
            FakeTransport::scripted(vec![ok(EMPTY), ok(EMPTY), ok(EMPTY)])
                .with_delay(Duration::from_millis(20)),
        );
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let (a, b, c) = tokio::join!(client.fetch("1"), client.fetch("2"), client.fetch("3"));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(transport.call_count(), 3);
        assert_eq!(transport.max_active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_callers_are_served_in_submission_order() {
        let steps = (0..5).map(|_| ok(EMPTY)).collect();
        let transport =
            Arc::new(FakeTransport::scripted(steps).with_delay(Duration::from_millis(20)));
        let client = UpstreamClient::with_transport(config(&["https://a"]), transport.clone());

        let results = tokio::join!(
            client.fetch("1"),
            client.fetch("2"),
            client.fetch("3"),
            client.fetch("4"),
            client.fetch("5"),
        );
        assert!(results.0.is_ok() && results.4.is_ok());
        assert_eq!(transport.queries(), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(transport.max_active(), 1);
    }

    #[tokio::test]
    async fn no_endpoints_is_an_error() {
        let transport = Arc::new(FakeTransport::scripted(vec![]));
        let client = UpstreamClient::with_transport(config(&[]), transport);
        assert_eq!(client.fetch("q").await.unwrap_err(), UpstreamError::NoEndpoints);
    }

    #[test]
    fn parses_ways_and_relation_outer_rings() {
        let body = r#"{
            "elements": [
                {"type": "node", "id": 1, "lat": 0.0, "lon": 0.0},
                {"type": "way", "id": 2, "tags": {"building": "yes"},
                 "geometry": [{"lat": 0, "lon": 0}, {"lat": 0, "lon": 1}, {"lat": 1, "lon": 1}, {"lat": 0, "lon": 0}]},
                {"type": "relation", "id": 3, "tags": {"natural": "water"},
                 "members": [
                    {"type": "way", "ref": 10, "role": "outer",
                     "geometry": [{"lat": 0, "lon": 0}, {"lat": 0, "lon": 2}]},
                    {"type": "way", "ref": 11, "role": "outer",
                     "geometry": [{"lat": 2, "lon": 2}, {"lat": 0, "lon": 2}]},
                    {"type": "way", "ref": 12, "role": "outer",
                     "geometry": [{"lat": 2, "lon": 2}, {"lat": 0, "lon": 0}]},
                    {"type": "way", "ref": 13, "role": "inner",
                     "geometry": [{"lat": 1, "lon": 1}, {"lat": 1, "lon": 1.5}, {"lat": 1.5, "lon": 1.5}, {"lat": 1, "lon": 1}]},
                    {"type": "node", "ref": 14, "role": "label"}
                 ]}
            ]
        }"#;
        let response: OverpassResponse = serde_json::from_str(body).unwrap();
        let elements = response.raw_elements();
        assert_eq!(elements.len(), 2);

        assert_eq!(elements[0].kind, ElementKind::Way);
        assert_eq!(elements[0].tags.get("building"), Some("yes"));

        let relation = &elements[1];
        assert_eq!(relation.kind, ElementKind::Relation);
        assert_eq!(relation.id, 3);
        assert!(relation.is_closed());
        assert_eq!(
            relation.geometry,
            vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 0.0]]
        );
    }

    #[test]
    fn relations_with_only_inner_members_yield_nothing() {
        let body = r#"{
            "elements": [
                {"type": "relation", "id": 4, "tags": {"natural": "water"},
                 "members": [
                    {"type": "way", "ref": 20, "role": "inner",
                     "geometry": [{"lat": 0, "lon": 0}, {"lat": 0, "lon": 1},
                                  {"lat": 1, "lon": 1}, {"lat": 0, "lon": 0}]}
                 ]}
            ]
        }"#;
        let response: OverpassResponse = serde_json::from_str(body).unwrap();
        assert!(response.raw_elements().is_empty());
    }
}
