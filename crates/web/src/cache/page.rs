//! Whole-response page cache middleware.

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::{CacheKey, CacheValue, CachedPage};
use crate::state::AppState;

/// Largest body the page cache will buffer.
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;

/// Serve `GET` requests from the cache, storing successful responses for
/// `PAGE_CACHE_TTL`.
///
/// Keyed by path and query string. Other methods pass straight through, so
/// the middleware can sit on a route that also accepts writes.
pub async fn cache_page(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = CacheKey::Page(request.uri().to_string());
    if let Some(CacheValue::Page(page)) = state.cache().get(&key).await {
        return page.into_response();
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, key = %key, "failed to buffer response for page cache");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let page = CachedPage {
        content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
        body: bytes.clone(),
    };
    state
        .cache()
        .set(key, CacheValue::Page(page), state.config().page_cache_ttl)
        .await;

    Response::from_parts(parts, Body::from(bytes))
}
