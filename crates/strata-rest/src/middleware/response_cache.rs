//! Response cache gate for read requests.
//!
//! Each inbound call is classified by [`ResponseCacheGate::decide`]:
//!
//! 1. calls marked [`NoCache`] (or under a configured prefix) bypass,
//! 2. anything but `GET` bypasses,
//! 3. an administrator sending `Cache-Control: no-cache` bypasses,
//! 4. everything else is looked up under `http:<path>:<hash of query>`.
//!
//! On a miss the handler runs and the response is written back in a detached
//! task, so population never delays or fails the call being served.

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, Method, Request, StatusCode, Uri,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strata_cache::{cache_key, Cache, CacheOptions, KeyBuilder};
use strata_config::HttpCacheConfig;
use strata_core::Caller;
use tracing::{debug, warn};

pub(crate) const X_CACHE: &str = "x-cache";

/// Request extension exempting a call from response caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Run the handler directly.
    Bypass(&'static str),
    /// Serve from `key` or populate it for `ttl`.
    Cache { key: String, ttl: Duration },
}

/// Stored form of a cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedResponse {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, self.body).into_response();
        if let Some(content_type) = self
            .content_type
            .and_then(|ct| HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        response
    }
}

#[derive(Clone)]
pub struct ResponseCacheGate {
    cache: Cache,
    config: Arc<HttpCacheConfig>,
}

impl ResponseCacheGate {
    pub fn new(cache: Cache, config: HttpCacheConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
        }
    }

    /// Cache key for a path and raw query string.
    ///
    /// Query parameters are hashed as an object, so the order of distinct
    /// names does not change the key. A repeated name maps to the array of
    /// its values in request order.
    pub fn cache_key(path: &str, query: Option<&str>) -> String {
        let pairs: Vec<(String, String)> = query
            .and_then(|q| format!("/?{q}").parse::<Uri>().ok())
            .and_then(|uri| Query::<Vec<(String, String)>>::try_from_uri(&uri).ok())
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in pairs {
            grouped.entry(name).or_default().push(value);
        }
        let params: serde_json::Map<String, Value> = grouped
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    Value::String(values.remove(0))
                } else {
                    Value::Array(values.into_iter().map(Value::String).collect())
                };
                (name, value)
            })
            .collect();

        cache_key!("http", path, KeyBuilder::hash(&Value::Object(params)))
    }

    /// TTL of the first rule whose fragment occurs in `path`.
    pub fn ttl_for(&self, path: &str) -> Duration {
        let secs = self
            .config
            .ttl_rules
            .iter()
            .find(|rule| path.contains(&rule.contains))
            .map_or(self.config.default_ttl_secs, |rule| rule.ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn decide<B>(&self, request: &Request<B>) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::Bypass("disabled");
        }

        let path = request.uri().path();
        if request.extensions().get::<NoCache>().is_some()
            || self
                .config
                .no_cache_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return GateDecision::Bypass("no-cache");
        }

        if request.method() != Method::GET {
            return GateDecision::Bypass("not a read");
        }

        let is_admin = request
            .extensions()
            .get::<Caller>()
            .is_some_and(Caller::is_admin);
        let wants_fresh = request
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("no-cache"));
        if is_admin && wants_fresh {
            return GateDecision::Bypass("admin refresh");
        }

        GateDecision::Cache {
            key: Self::cache_key(path, request.uri().query()),
            ttl: self.ttl_for(path),
        }
    }

    /// Buffers the handler's response and writes cacheable ones back.
    async fn populate(&self, key: String, ttl: Duration, response: Response) -> Response {
        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if !response.status().is_success()
            || declared_len.is_some_and(|len| len > self.config.max_body_bytes)
        {
            return with_miss_header(response);
        }

        let (parts, body) = response.into_parts();
        let bytes = match buffer_body(body, self.config.max_body_bytes).await {
            Buffered::Complete(bytes) => bytes,
            Buffered::Overflow(body) => {
                debug!(key = %key, "Response body over the cache limit, not cached");
                return with_miss_header(Response::from_parts(parts, body));
            }
            Buffered::Failed(body, reason) => {
                warn!(key = %key, error = %reason, "Response body failed while buffering, not cached");
                return with_miss_header(Response::from_parts(parts, body));
            }
        };

        if let Ok(text) = std::str::from_utf8(&bytes) {
            let entry = CachedResponse {
                status: parts.status.as_u16(),
                content_type: parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: text.to_string(),
            };
            let cache = self.cache.clone();
            tokio::spawn(async move {
                cache.set(&key, &entry, &CacheOptions::new().ttl(ttl)).await;
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Response cached");
            });
        }

        with_miss_header(Response::from_parts(parts, Body::from(bytes)))
    }
}

enum Buffered {
    Complete(Bytes),
    /// Over the limit; carries the read prefix followed by the rest.
    Overflow(Body),
    /// The handler's body errored; carries the read prefix and the error.
    Failed(Body, String),
}

/// Reads `body` until it ends or grows past `limit` bytes.
async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut chunks = body.into_data_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(data) => {
                buf.extend_from_slice(&data);
                if buf.len() > limit {
                    let prefix = stream::once(future::ready(Ok(Bytes::from(buf))));
                    return Buffered::Overflow(Body::from_stream(prefix.chain(chunks)));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                let replay = stream::iter([Ok(Bytes::from(buf)), Err(e)]);
                return Buffered::Failed(Body::from_stream(replay), reason);
            }
        }
    }

    Buffered::Complete(Bytes::from(buf))
}

fn with_miss_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    response
}

pub async fn response_cache_middleware(
    State(gate): State<ResponseCacheGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (key, ttl) = match gate.decide(&request) {
        GateDecision::Bypass(reason) => {
            debug!(uri = %request.uri(), reason, "Response cache bypassed");
            return next.run(request).await;
        }
        GateDecision::Cache { key, ttl } => (key, ttl),
    };

    if let Some(cached) = gate.cache.get::<CachedResponse>(&key).await {
        debug!(key = %key, "Serving cached response");
        return cached.into_response();
    }

    let response = next.run(request).await;
    gate.populate(key, ttl, response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Extension, Router};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_cache::{MemoryStore, MetricsRecorder, MockCacheStore, StoreFault, TagIndex};
    use strata_config::TtlRule;
    use strata_core::CallerRole;
    use tower::ServiceExt;

    fn gate_with(store: Arc<dyn strata_cache::CacheStore>, config: HttpCacheConfig) -> ResponseCacheGate {
        let cache = Cache::new(store, Arc::new(TagIndex::new()), Arc::new(MetricsRecorder::new()));
        ResponseCacheGate::new(cache, config)
    }

    fn gate() -> ResponseCacheGate {
        gate_with(Arc::new(MemoryStore::new(100)), HttpCacheConfig::default())
    }

    /// Handler streaming two 8-byte chunks without a declared length,
    /// failing instead of sending the second one when `fail` is set.
    fn chunked(
        calls: Arc<AtomicUsize>,
        fail: bool,
    ) -> impl Fn() -> std::future::Ready<Response> + Clone + Send + Sync + 'static {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let second = if fail {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream reset"))
            } else {
                Ok(Bytes::from_static(b"89abcdef"))
            };
            let chunks = stream::iter([Ok(Bytes::from_static(b"01234567")), second]);
            std::future::ready(Body::from_stream(chunks).into_response())
        }
    }

    fn app(gate: ResponseCacheGate, calls: Arc<AtomicUsize>) -> Router {
        let stream_calls = calls.clone();
        let broken_calls = calls.clone();
        let counted = move |body: &'static str, status: StatusCode| {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (status, body)
                }
            }
        };

        Router::new()
            .route(
                "/orders/:id",
                get(counted("order", StatusCode::OK)).post(counted("created", StatusCode::OK)),
            )
            .route("/users/:id", get(counted("user", StatusCode::OK)))
            .route("/missing", get(counted("nope", StatusCode::NOT_FOUND)))
            .route("/health", get(counted("ok", StatusCode::OK)))
            .route("/large", get(counted("0123456789abcdef", StatusCode::OK)))
            .route("/items", get(|uri: Uri| async move { uri.query().unwrap_or_default().to_string() }))
            .route("/stream", get(chunked(stream_calls, false)))
            .route("/broken", get(chunked(broken_calls, true)))
            .layer(middleware::from_fn_with_state(gate, response_cache_middleware))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let x_cache = response
            .headers()
            .get(X_CACHE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, x_cache, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_ttl_rules() {
        let gate = gate();
        assert_eq!(gate.ttl_for("/api/v1/users/7"), Duration::from_secs(60));
        assert_eq!(gate.ttl_for("/orders/7"), Duration::from_secs(300));
    }

    #[test]
    fn test_first_ttl_rule_wins() {
        let config = HttpCacheConfig {
            ttl_rules: vec![
                TtlRule { contains: "/users".into(), ttl_secs: 60 },
                TtlRule { contains: "/users/stats".into(), ttl_secs: 5 },
            ],
            ..HttpCacheConfig::default()
        };
        let gate = gate_with(Arc::new(MemoryStore::new(10)), config);
        assert_eq!(gate.ttl_for("/users/stats"), Duration::from_secs(60));
    }

    #[test]
    fn test_cache_key_ignores_query_order() {
        let a = ResponseCacheGate::cache_key("/orders", Some("page=2&limit=10"));
        let b = ResponseCacheGate::cache_key("/orders", Some("limit=10&page=2"));
        assert_eq!(a, b);
        assert!(a.starts_with("http:/orders:"));
        assert_ne!(a, ResponseCacheGate::cache_key("/orders", Some("page=3&limit=10")));
    }

    #[test]
    fn test_cache_key_keeps_repeated_params() {
        let both = ResponseCacheGate::cache_key("/items", Some("id=1&id=2"));
        let last = ResponseCacheGate::cache_key("/items", Some("id=2"));
        assert_ne!(both, last);
        assert_ne!(both, ResponseCacheGate::cache_key("/items", Some("id=1")));
        assert_ne!(both, ResponseCacheGate::cache_key("/items", Some("id=2&id=1")));
        assert_eq!(both, ResponseCacheGate::cache_key("/items", Some("id=1&id=2")));
    }

    #[test]
    fn test_decision_order() {
        let gate = gate();

        let mut marked = Request::post("/orders/7").body(()).unwrap();
        marked.extensions_mut().insert(NoCache);
        assert_eq!(gate.decide(&marked), GateDecision::Bypass("no-cache"));

        let post = Request::post("/orders/7").body(()).unwrap();
        assert_eq!(gate.decide(&post), GateDecision::Bypass("not a read"));

        let mut admin = Request::get("/orders/7")
            .header(CACHE_CONTROL, "no-cache")
            .body(())
            .unwrap();
        admin.extensions_mut().insert(Caller::new("root", CallerRole::Admin));
        assert_eq!(gate.decide(&admin), GateDecision::Bypass("admin refresh"));

        let mut user = Request::get("/orders/7")
            .header(CACHE_CONTROL, "no-cache")
            .body(())
            .unwrap();
        user.extensions_mut().insert(Caller::new("alice", CallerRole::User));
        assert_eq!(
            gate.decide(&user),
            GateDecision::Cache {
                key: ResponseCacheGate::cache_key("/orders/7", None),
                ttl: Duration::from_secs(300),
            }
        );

        let health = Request::get("/health").body(()).unwrap();
        assert_eq!(gate.decide(&health), GateDecision::Bypass("no-cache"));
    }

    #[test]
    fn test_disabled_gate_bypasses() {
        let config = HttpCacheConfig {
            enabled: false,
            ..HttpCacheConfig::default()
        };
        let gate = gate_with(Arc::new(MemoryStore::new(10)), config);
        let request = Request::get("/orders/7").body(()).unwrap();
        assert_eq!(gate.decide(&request), GateDecision::Bypass("disabled"));
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate();
        let app = app(gate.clone(), calls.clone());

        let (status, x_cache, body) = send(&app, get_request("/orders/7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, "order");
        settle().await;

        let key = ResponseCacheGate::cache_key("/orders/7", None);
        assert!(gate.cache.get::<CachedResponse>(&key).await.is_some());

        let (status, x_cache, body) = send(&app, get_request("/orders/7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("HIT"));
        assert_eq!(body, "order");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_writes_always_execute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate(), calls.clone());

        for _ in 0..2 {
            let request = Request::post("/orders/7").body(Body::empty()).unwrap();
            let (_, x_cache, _) = send(&app, request).await;
            assert_eq!(x_cache, None);
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_admin_refresh_skips_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate(), calls.clone()).layer(Extension(Caller::new("root", CallerRole::Admin)));

        send(&app, get_request("/orders/7")).await;
        settle().await;

        let refresh = Request::get("/orders/7")
            .header(CACHE_CONTROL, "no-cache")
            .body(Body::empty())
            .unwrap();
        let (_, x_cache, _) = send(&app, refresh).await;
        assert_eq!(x_cache, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_excluded_prefix_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate(), calls.clone());

        send(&app, get_request("/health")).await;
        settle().await;
        send(&app, get_request("/health")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate(), calls.clone());

        let (status, x_cache, _) = send(&app, get_request("/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        settle().await;
        send(&app, get_request("/missing")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_bodies_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = HttpCacheConfig {
            max_body_bytes: 8,
            ..HttpCacheConfig::default()
        };
        let app = app(gate_with(Arc::new(MemoryStore::new(10)), config), calls.clone());

        let (_, _, body) = send(&app, get_request("/large")).await;
        assert_eq!(body, "0123456789abcdef");
        settle().await;
        send(&app, get_request("/large")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_params_are_served_their_own_body() {
        let app = app(gate(), Arc::new(AtomicUsize::new(0)));

        let (_, x_cache, body) = send(&app, get_request("/items?id=1&id=2")).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, "id=1&id=2");
        settle().await;

        let (_, x_cache, body) = send(&app, get_request("/items?id=2")).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, "id=2");
        settle().await;

        let (_, x_cache, body) = send(&app, get_request("/items?id=1&id=2")).await;
        assert_eq!(x_cache.as_deref(), Some("HIT"));
        assert_eq!(body, "id=1&id=2");
    }

    #[tokio::test]
    async fn test_streamed_oversized_body_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = HttpCacheConfig {
            max_body_bytes: 8,
            ..HttpCacheConfig::default()
        };
        let app = app(gate_with(Arc::new(MemoryStore::new(10)), config), calls.clone());

        let (status, x_cache, body) = send(&app, get_request("/stream")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, "0123456789abcdef");
        settle().await;

        let (_, x_cache, _) = send(&app, get_request("/stream")).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_body_error_is_passed_on_uncached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate(), calls.clone());

        let response = app.clone().oneshot(get_request("/broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_CACHE], "MISS");
        assert!(response.into_body().collect().await.is_err());
        settle().await;

        let response = app.oneshot(get_request("/broken")).await.unwrap();
        assert_eq!(response.headers()[X_CACHE], "MISS");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_faults_fail_open() {
        let mut store = MockCacheStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreFault::Connection("refused".into())));
        store
            .expect_set()
            .returning(|_, _, _| Err(StoreFault::Connection("refused".into())));
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(gate_with(Arc::new(store), HttpCacheConfig::default()), calls.clone());

        for _ in 0..2 {
            let (status, _, body) = send(&app, get_request("/orders/7")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, "order");
            settle().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_response_keeps_content_type() {
        let cached = CachedResponse {
            status: 200,
            content_type: Some("application/json".into()),
            body: "{\"id\":7}".into(),
        };
        let response = cached.into_response();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[X_CACHE], "HIT");
    }
}
