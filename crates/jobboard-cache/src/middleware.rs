use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{
            CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, DATE, SET_COOKIE, TRANSFER_ENCODING,
        },
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::cache::cdn::{CdnProfile, cdn_headers};
use crate::cache::{CacheManager, CacheOptions};
use crate::config::CdnSettings;

/// Marks whether a response was served from the response cache.
pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Computes a cache key from the request head.
pub type KeyGenerator = Arc<dyn Fn(&Parts) -> String + Send + Sync>;

// =============================================================================
// Response Cache Middleware
// =============================================================================

/// Largest response body buffered for caching by default (1 MiB).
const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Response headers never replayed from the cache.
static UNCACHED_HEADERS: [HeaderName; 7] = [
    CACHE_CONTROL,
    CONTENT_LENGTH,
    CONNECTION,
    TRANSFER_ENCODING,
    SET_COOKIE,
    DATE,
    HeaderName::from_static("x-cache"),
];

/// Options for [`response_cache`].
#[derive(Clone)]
pub struct ResponseCacheOptions {
    /// Lifetime of cached responses, also advertised via `Cache-Control`
    pub ttl: Duration,
    /// Namespace for cached responses
    pub namespace: String,
    /// Ignore the query string when building the key
    pub skip_query: bool,
    /// Ignore the request body when building the key
    pub skip_body: bool,
    /// Responses (and keyed request bodies) larger than this are never
    /// buffered; they pass through uncached
    pub max_body_bytes: usize,
    /// Custom key builder; replaces the path/query/body key entirely
    pub key_generator: Option<KeyGenerator>,
}

impl Default for ResponseCacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            namespace: "http".to_string(),
            skip_query: false,
            skip_body: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            key_generator: None,
        }
    }
}

impl fmt::Debug for ResponseCacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCacheOptions")
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .field("skip_query", &self.skip_query)
            .field("skip_body", &self.skip_body)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("key_generator", &self.key_generator.is_some())
            .finish()
    }
}

impl ResponseCacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Parts) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    fn cache_options(&self) -> CacheOptions {
        CacheOptions::namespace(self.namespace.clone()).with_ttl(self.ttl)
    }

    fn cache_control(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("public, max-age={}", self.ttl.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("public"))
    }

    /// Whether a body of this exact length can be buffered. `None` (a stream
    /// of unknown length) never fits.
    fn fits(&self, exact_len: Option<u64>) -> bool {
        exact_len.is_some_and(|len| usize::try_from(len).is_ok_and(|len| len <= self.max_body_bytes))
    }
}

/// State required for the response cache middleware.
#[derive(Clone)]
pub struct ResponseCacheState {
    pub cache: Arc<CacheManager>,
    pub options: ResponseCacheOptions,
}

impl ResponseCacheState {
    #[must_use]
    pub fn new(cache: Arc<CacheManager>, options: ResponseCacheOptions) -> Self {
        Self { cache, options }
    }
}

/// A captured response as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedResponse {
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    body: String,
}

fn default_status() -> u16 {
    StatusCode::OK.as_u16()
}

/// Response cache middleware for GET requests.
///
/// This middleware:
/// 1. Passes every non-GET request through untouched
/// 2. Serves a cached response with `X-Cache: HIT` when one exists
/// 3. Otherwise runs the handler and tags the response `X-Cache: MISS`.
///    Successful responses whose length is known up front and within
///    `max_body_bytes` are buffered and written to the cache in the
///    background; streaming and oversized bodies pass through as-is.
///
/// A failed cache write never delays or alters the response.
pub async fn response_cache(
    State(state): State<ResponseCacheState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let options = &state.options;
    let (parts, body) = req.into_parts();

    let (key, body) = match &options.key_generator {
        Some(generate) => (generate(&parts), body),
        None if options.skip_body => (default_key(&parts, options.skip_query, &[]), body),
        None if !options.fits(body.size_hint().exact()) => {
            tracing::debug!(path = %parts.uri.path(), "request body not bufferable, bypassing response cache");
            return tag(next.run(axum::http::Request::from_parts(parts, body)).await, "MISS");
        }
        None => {
            let bytes = match axum::body::to_bytes(body, options.max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to read request body");
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };
            (
                default_key(&parts, options.skip_query, &bytes),
                Body::from(bytes),
            )
        }
    };

    let cache_opts = options.cache_options();

    if let Some(cached) = state.cache.get::<CachedResponse>(&key, &cache_opts).await {
        tracing::debug!(key = %key, "response cache hit");
        return cached_response(cached, options.cache_control());
    }

    let response = next.run(axum::http::Request::from_parts(parts, body)).await;

    if !response.status().is_success() {
        return tag(response, "MISS");
    }
    if !options.fits(response.body().size_hint().exact()) {
        tracing::debug!(key = %key, "response body is streamed or too large, not caching");
        return tag(response, "MISS");
    }

    let (mut head, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, options.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let entry = CachedResponse {
                status: head.status.as_u16(),
                headers: replayable_headers(&head.headers),
                body: text.to_string(),
            };
            let cache = Arc::clone(&state.cache);
            tokio::spawn(async move {
                if !cache.set(&key, &entry, &cache_opts).await {
                    tracing::debug!(key = %key, "response cache write failed");
                }
            });
        }
        Err(_) => {
            tracing::debug!(key = %key, "non-UTF-8 response body, not caching");
        }
    }

    head.headers.insert(CACHE_CONTROL, options.cache_control());
    tag(Response::from_parts(head, Body::from(bytes)), "MISS")
}

/// Default key: path, normalized query (sorted pairs) and optional body text.
fn default_key(parts: &Parts, skip_query: bool, body: &[u8]) -> String {
    let mut key = parts.uri.path().to_string();

    if !skip_query
        && let Some(query) = parts.uri.query()
    {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if !pairs.is_empty() {
            pairs.sort();
            let normalized = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            key.push('?');
            key.push_str(&normalized);
        }
    }

    if !body.is_empty() {
        key.push('#');
        key.push_str(&String::from_utf8_lossy(body));
    }

    key
}

fn replayable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !UNCACHED_HEADERS.contains(name))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn cached_response(cached: CachedResponse, cache_control: HeaderValue) -> Response {
    let mut response = Response::new(Body::from(Bytes::from(cached.body)));
    *response.status_mut() = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let headers = response.headers_mut();
    for (name, value) in cached.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert(CACHE_CONTROL, cache_control);
    tag(response, "HIT")
}

fn tag(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE.clone(), HeaderValue::from_static(status));
    response
}

// =============================================================================
// CDN Profile Middleware
// =============================================================================

/// State for [`cdn_profile`].
#[derive(Clone, Debug)]
pub struct CdnProfileState {
    pub profile: CdnProfile,
    pub ttl: Option<u64>,
    pub settings: CdnSettings,
}

impl CdnProfileState {
    #[must_use]
    pub fn new(profile: CdnProfile, settings: CdnSettings) -> Self {
        Self {
            profile,
            ttl: None,
            settings,
        }
    }
}

/// Applies a CDN profile to responses that didn't set `Cache-Control` themselves.
pub async fn cdn_profile(
    State(state): State<CdnProfileState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;

    if response.headers().contains_key(CACHE_CONTROL) {
        return response;
    }

    let headers = cdn_headers(state.profile, state.ttl, &state.settings);
    for (name, value) in headers.iter() {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    response
}
