//! Integration tests for mysite.
//!
//! Each test spawns the full application on an ephemeral port, backed by
//! the in-memory database, `MemoryStore` sessions and the moka cache, and
//! talks to it over HTTP with `reqwest`.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p mysite-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `shop` - Product and order pages, ownership rules
//! - `api` - REST viewsets, CSV round trip, pagination
//! - `caching` - Export and page caches
//! - `feeds` - Blog, RSS and sitemap
//! - `accounts` - Login, registration, cookie and session demos

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::{Client, redirect};
use secrecy::SecretString;
use tower_sessions::MemoryStore;
use url::Url;

use mysite_core::{Price, UserId};
use mysite_web::config::{MEMORY_DATABASE_URL, WebConfig};
use mysite_web::db::{MemoryDatabase, Repositories};
use mysite_web::models::{Article, NewArticle, NewProduct, Product, ProductFields, User};
use mysite_web::services::auth::AuthService;
use mysite_web::state::AppState;

/// Password given to every user created by [`TestApp::create_user`].
pub const PASSWORD: &str = "test-password-123";

/// A running application plus direct access to its database.
pub struct TestApp {
    pub base_url: String,
    pub repos: Repositories,
    pub config: WebConfig,
    media_root: PathBuf,
}

impl TestApp {
    /// Spawn the application with default settings.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn the application after letting `configure` adjust the config.
    pub async fn spawn_with(configure: impl FnOnce(&mut WebConfig)) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");
        let media_root = std::env::temp_dir().join(format!("mysite-it-{}", uuid::Uuid::new_v4()));

        let mut config = WebConfig::with_defaults(
            SecretString::from(MEMORY_DATABASE_URL),
            SecretString::from("integration-test-session-secret-0123456789"),
        );
        config.base_url = Url::parse(&base_url).unwrap();
        config.media_root.clone_from(&media_root);
        configure(&mut config);

        let memory: Arc<MemoryDatabase> = MemoryDatabase::shared();
        let repos = Repositories::in_memory(&memory);
        let cache = AppState::cache_for(&config);
        let state = AppState::new(config.clone(), repos.clone(), cache, None);
        let app = mysite_web::app(state, MemoryStore::default());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            repos,
            config,
            media_root,
        }
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// A fresh client with its own cookie jar that does not follow redirects.
    #[must_use]
    pub fn client(&self) -> Client {
        Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// Create a user with [`PASSWORD`].
    pub async fn create_user(&self, username: &str, staff: bool, superuser: bool) -> User {
        let (user, _) = AuthService::new(self.repos.users.as_ref())
            .create_user(username, PASSWORD, staff, superuser)
            .await
            .unwrap();
        user
    }

    /// Grant `codenames` directly to `user`.
    pub async fn grant(&self, user: &User, codenames: &[&str]) {
        for codename in codenames {
            self.repos
                .users
                .grant_permission(user.id, codename)
                .await
                .unwrap();
        }
    }

    /// A client logged in as `username`.
    pub async fn login(&self, username: &str) -> Client {
        let client = self.client();
        let response = client
            .post(self.url("/accounts/login/"))
            .form(&[("username", username), ("password", PASSWORD)])
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            reqwest::StatusCode::SEE_OTHER,
            "login failed for {username}"
        );
        client
    }

    /// Insert a product directly.
    pub async fn create_product(&self, name: &str, price: &str, created_by: Option<UserId>) -> Product {
        self.repos
            .products
            .create(NewProduct {
                fields: ProductFields {
                    name: name.to_owned(),
                    description: format!("About {name}"),
                    price: Price::parse(price).unwrap(),
                    ..ProductFields::default()
                },
                created_by,
            })
            .await
            .unwrap()
    }

    /// Insert an article; `published` ones are dated `age_days` ago.
    pub async fn create_article(&self, title: &str, body: &str, published: Option<i64>) -> Article {
        self.repos
            .articles
            .create(NewArticle {
                title: title.to_owned(),
                body: body.to_owned(),
                published_at: published.map(|age_days| Utc::now() - Duration::days(age_days)),
            })
            .await
            .unwrap()
    }

    /// Where uploaded files of this instance land.
    #[must_use]
    pub const fn media_root(&self) -> &PathBuf {
        &self.media_root
    }
}
