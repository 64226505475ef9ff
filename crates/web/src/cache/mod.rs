//! Response and payload caching.
//!
//! Handlers talk to a [`CachePort`] held in the application state. The
//! default backend is an in-process `moka` cache where every entry carries
//! its own time to live; `CACHE_BACKEND=none` swaps in [`NoopCache`].
//!
//! Nothing is invalidated on write: readers may see data up to one TTL old.

pub mod page;

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use moka::Expiry;
use moka::future::Cache;

use mysite_core::UserId;

pub use page::cache_page;

/// Maximum number of cached entries.
const MAX_ENTRIES: u64 = 10_000;

/// Cache key for exports and cached pages.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum CacheKey {
    /// `GET /products/export/`
    ProductsExport,
    /// `GET /users/{id}/orders/export/`
    UserOrdersExport(UserId),
    /// A whole `GET` response, keyed by path and query.
    Page(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProductsExport => f.write_str("products_data_export"),
            Self::UserOrdersExport(user) => write!(f, "user_orders_data_export:{user}"),
            Self::Page(uri) => write!(f, "page:GET:{uri}"),
        }
    }
}

/// A stored response: content type and body. Headers such as `Set-Cookie`
/// are never stored.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for CachedPage {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::OK, Body::from(self.body)).into_response();
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Cached value types.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// A serialized JSON payload.
    Json(Bytes),
    Page(CachedPage),
}

/// Key-value cache with a time to live per entry.
#[async_trait]
pub trait CachePort: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    async fn set(&self, key: CacheKey, value: CacheValue, ttl: Duration);
}

#[derive(Clone)]
struct Entry {
    value: CacheValue,
    ttl: Duration,
}

/// Expire every entry after the TTL it was stored with.
struct PerEntryTtl;

impl Expiry<CacheKey, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &CacheKey, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache backed by `moka`.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<CacheKey, Entry>,
}

impl MokaCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CachePort for MokaCache {
    async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let hit = self.inner.get(key).await.map(|entry| entry.value);
        tracing::debug!(key = %key, hit = hit.is_some(), "cache lookup");
        hit
    }

    async fn set(&self, key: CacheKey, value: CacheValue, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache store");
        self.inner.insert(key, Entry { value, ttl }).await;
    }
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl CachePort for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Option<CacheValue> {
        None
    }

    async fn set(&self, _key: CacheKey, _value: CacheValue, _ttl: Duration) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn json(s: &'static str) -> CacheValue {
        CacheValue::Json(Bytes::from_static(s.as_bytes()))
    }

    fn unwrap_json(value: Option<CacheValue>) -> Bytes {
        match value {
            Some(CacheValue::Json(bytes)) => bytes,
            other => panic!("expected json entry, got {other:?}"),
        }
    }

    #[test]
    fn test_key_strings() {
        assert_eq!(CacheKey::ProductsExport.to_string(), "products_data_export");
        assert_eq!(
            CacheKey::UserOrdersExport(UserId::new(4)).to_string(),
            "user_orders_data_export:4"
        );
        assert_eq!(
            CacheKey::Page("/api/products/?page=2".to_owned()).to_string(),
            "page:GET:/api/products/?page=2"
        );
    }

    #[tokio::test]
    async fn test_moka_roundtrip() {
        let cache = MokaCache::new();
        cache
            .set(CacheKey::ProductsExport, json("[1]"), Duration::from_secs(60))
            .await;
        assert_eq!(
            unwrap_json(cache.get(&CacheKey::ProductsExport).await),
            Bytes::from_static(b"[1]")
        );
        assert!(cache.get(&CacheKey::UserOrdersExport(UserId::new(1))).await.is_none());
    }

    #[tokio::test]
    async fn test_moka_entry_expires_after_its_ttl() {
        let cache = MokaCache::new();
        cache
            .set(CacheKey::ProductsExport, json("old"), Duration::from_millis(100))
            .await;
        cache
            .set(
                CacheKey::UserOrdersExport(UserId::new(1)),
                json("long"),
                Duration::from_secs(60),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(cache.get(&CacheKey::ProductsExport).await.is_none());
        assert!(cache.get(&CacheKey::UserOrdersExport(UserId::new(1))).await.is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_stored() {
        let cache = MokaCache::new();
        cache
            .set(CacheKey::ProductsExport, json("x"), Duration::ZERO)
            .await;
        assert!(cache.get(&CacheKey::ProductsExport).await.is_none());
    }

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopCache;
        cache
            .set(CacheKey::ProductsExport, json("x"), Duration::from_secs(60))
            .await;
        assert!(cache.get(&CacheKey::ProductsExport).await.is_none());
    }
}
