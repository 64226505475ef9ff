//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cache::{CachePort, MokaCache, NoopCache};
use crate::config::{CacheBackend, WebConfig};
use crate::db::Repositories;
use crate::services::media::MediaStore;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like repositories, the cache and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: WebConfig,
    repos: Repositories,
    cache: Arc<dyn CachePort>,
    media: MediaStore,
    pool: Option<PgPool>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Web configuration
    /// * `repos` - Repository set (sqlx or in-memory)
    /// * `cache` - Cache backend
    /// * `pool` - `PostgreSQL` pool, `None` when running on the in-memory database
    #[must_use]
    pub fn new(
        config: WebConfig,
        repos: Repositories,
        cache: Arc<dyn CachePort>,
        pool: Option<PgPool>,
    ) -> Self {
        let media = MediaStore::new(config.media_root.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                repos,
                cache,
                media,
                pool,
            }),
        }
    }

    /// Build the cache selected by `config.cache_backend`.
    #[must_use]
    pub fn cache_for(config: &WebConfig) -> Arc<dyn CachePort> {
        match config.cache_backend {
            CacheBackend::Memory => Arc::new(MokaCache::new()),
            CacheBackend::None => Arc::new(NoopCache),
        }
    }

    /// Get a reference to the web configuration.
    #[must_use]
    pub fn config(&self) -> &WebConfig {
        &self.inner.config
    }

    /// Get the repository set.
    #[must_use]
    pub fn repos(&self) -> &Repositories {
        &self.inner.repos
    }

    /// Get the cache backend.
    #[must_use]
    pub fn cache(&self) -> &dyn CachePort {
        self.inner.cache.as_ref()
    }

    /// Get the upload store rooted at `MEDIA_ROOT`.
    #[must_use]
    pub fn media(&self) -> &MediaStore {
        &self.inner.media
    }

    /// Get the database connection pool, if running on `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
