//! Response cache and the gate in front of the race.
//!
//! [`ResponseCache`] is the put/match contract of the edge cache.
//! [`MemoryCache`] implements it in-process with a `DashMap`; entries expire
//! after the configured max-age and are dropped lazily on lookup.
//!
//! [`CacheGate`] owns the cache plus a [`TaskTracker`] for detached stores.
//! A store never delays the response it was cloned from, and shutdown
//! waits on the tracker so no write is silently lost.

use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::CacheConfig;

/// Cache lookup counter. Labels: result (`hit` | `miss`).
pub const CACHE_LOOKUPS_TOTAL: &str = "mirrorgate_cache_lookups_total";

/// A complete response as it was sent to the first caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Async key-value response cache.
///
/// Keys are full request URLs; the last writer wins.
pub trait ResponseCache: Send + Sync + 'static {
    fn get(&self, key: String) -> Pin<Box<dyn Future<Output = Option<CachedResponse>> + Send + '_>>;

    fn put(
        &self,
        key: String,
        response: CachedResponse,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

struct Entry {
    expires_at: Instant,
    response: CachedResponse,
}

/// In-process [`ResponseCache`].
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: String) -> Pin<Box<dyn Future<Output = Option<CachedResponse>> + Send + '_>> {
        Box::pin(async move {
            // The map guard must be released before `remove`.
            let found = self
                .entries
                .get(&key)
                .map(|e| (e.expires_at, e.response.clone()));
            match found {
                Some((expires_at, response)) if expires_at > Instant::now() => Some(response),
                Some(_) => {
                    self.entries.remove(&key);
                    None
                }
                None => None,
            }
        })
    }

    fn put(
        &self,
        key: String,
        response: CachedResponse,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let entry = Entry {
                expires_at: Instant::now() + self.ttl,
                response,
            };
            self.entries.insert(key, entry);
        })
    }
}

/// Cache front for content responses.
#[derive(Clone)]
pub struct CacheGate {
    cache: Arc<dyn ResponseCache>,
    tracker: TaskTracker,
    max_age: u64,
    enabled: bool,
}

impl CacheGate {
    pub fn new(cache: Arc<dyn ResponseCache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            tracker: TaskTracker::new(),
            max_age: config.max_age,
            enabled: config.enabled,
        }
    }

    /// Previously stored response for `key`, if any.
    pub async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }
        let hit = self.cache.get(key.to_string()).await;
        let result = if hit.is_some() { "hit" } else { "miss" };
        metrics::counter!(CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
        hit
    }

    /// `s-maxage=<max_age>`, appended to every successful content response.
    pub fn cache_control(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("s-maxage={}", self.max_age))
            .unwrap_or_else(|_| HeaderValue::from_static("s-maxage=31556952"))
    }

    /// Store `response` in the background without delaying the caller.
    pub fn store_detached(&self, key: String, response: CachedResponse) {
        if !self.enabled {
            return;
        }
        let cache = self.cache.clone();
        self.tracker.spawn(async move {
            debug!("caching {} bytes", response.body.len());
            cache.put(key, response).await;
        });
    }

    /// Tracker holding outstanding stores; shutdown closes and waits on it.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

/// `<scheme>://<host><path>[?<query>]` for an inbound request.
///
/// The scheme comes from `x-forwarded-proto` (default `http`), the host
/// from the `Host` header, falling back to the URI authority.
pub fn cache_key(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "http".to_string());
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    match uri.query() {
        Some(query) => format!("{scheme}://{host}{}?{query}", uri.path()),
        None => format!("{scheme}://{host}{}", uri.path()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static str) -> CachedResponse {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("image/png"));
        CachedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn gate(enabled: bool) -> (Arc<MemoryCache>, CacheGate) {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let config = CacheConfig {
            enabled,
            max_age: 600,
        };
        (cache.clone(), CacheGate::new(cache, &config))
    }

    #[tokio::test]
    async fn test_memory_cache_put_then_get() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        assert!(cache.get("k".to_string()).await.is_none());
        cache.put("k".to_string(), response("abc")).await;
        assert_eq!(cache.get("k".to_string()).await, Some(response("abc")));
    }

    #[tokio::test]
    async fn test_memory_cache_expired_entry_is_dropped() {
        let cache = MemoryCache::new(Duration::ZERO);
        cache.put("k".to_string(), response("abc")).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k".to_string()).await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_store_detached_completes_before_tracker_wait() {
        let (cache, gate) = gate(true);
        gate.store_detached("http://edge/logo.png".to_string(), response("png"));
        gate.tracker().close();
        gate.tracker().wait().await;
        assert_eq!(cache.len(), 1);
        assert_eq!(
            gate.lookup("http://edge/logo.png").await,
            Some(response("png"))
        );
    }

    #[tokio::test]
    async fn test_disabled_gate_never_stores_or_hits() {
        let (cache, gate) = gate(false);
        cache.put("k".to_string(), response("abc")).await;
        assert!(gate.lookup("k").await.is_none());
        gate.store_detached("other".to_string(), response("x"));
        gate.tracker().close();
        gate.tracker().wait().await;
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_control_uses_max_age() {
        let (_, gate) = gate(true);
        assert_eq!(gate.cache_control(), "s-maxage=600");
    }

    #[test]
    fn test_cache_key() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("cdn.example.com"));
        let uri: Uri = "/images/logo.png?from=github".parse().unwrap();
        assert_eq!(
            cache_key(&headers, &uri),
            "http://cdn.example.com/images/logo.png?from=github"
        );

        headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTPS, http"));
        let uri: Uri = "/logo.png".parse().unwrap();
        assert_eq!(cache_key(&headers, &uri), "https://cdn.example.com/logo.png");
    }

    #[test]
    fn test_cache_key_partitions_by_query() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("edge"));
        let content: Uri = "/logo.png".parse().unwrap();
        let lookup: Uri = "/logo.png?from=where".parse().unwrap();
        assert_ne!(cache_key(&headers, &content), cache_key(&headers, &lookup));
    }
}
