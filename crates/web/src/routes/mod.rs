//! HTTP route handlers for mysite.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                              - Shop index
//! GET  /sitemap.xml                   - Sitemap
//!
//! # Products
//! GET  /products/                     - Product listing (non-archived)
//! GET  /products/{id}/                - Product detail with images
//! GET  /products/create/              - Create form
//! POST /products/create/              - Create action
//! GET  /products/{id}/update/         - Update form (creator only)
//! POST /products/{id}/update/         - Update action
//! POST /products/{id}/images/         - Upload images (multipart)
//! GET  /products/{id}/delete/         - Delete confirmation
//! POST /products/{id}/delete/         - Hard delete
//! GET  /products/{id}/archive/        - Archive confirmation
//! POST /products/{id}/archive/        - Soft delete
//! GET  /products/export/              - Cached JSON export
//! GET  /products/feed/                - RSS feed
//!
//! # Orders (requires auth)
//! GET  /orders/                       - Order listing
//! GET  /orders/{id}/                  - Order detail
//! GET  /orders/create/                - Create form
//! POST /orders/create/                - Create action
//! GET  /orders/{id}/update/           - Update form
//! POST /orders/{id}/update/           - Update action
//! GET  /orders/{id}/delete/           - Delete confirmation
//! POST /orders/{id}/delete/           - Delete action
//! GET  /orders/export/                - JSON export (staff)
//! GET  /users/{id}/orders/            - Orders of one user
//! GET  /users/{id}/orders/export/     - Cached JSON export of one user's orders
//!
//! # Accounts
//! GET  /accounts/login/               - Login page
//! POST /accounts/login/               - Login action
//! POST /accounts/logout/              - Logout action
//! GET  /accounts/register/            - Register page
//! POST /accounts/register/            - Register action
//! GET  /accounts/about-me/            - Own profile
//! POST /accounts/about-me/            - Replace own avatar
//! GET  /accounts/users/               - User list
//! GET  /accounts/users/{id}/          - User detail
//! POST /accounts/users/{id}/          - Replace avatar (staff or self)
//! GET  /accounts/cookie/set/          - Set the demo cookie (superuser)
//! GET  /accounts/cookie/get/          - Read the demo cookie (page cached)
//! GET  /accounts/session/set/         - Set the demo session value
//! GET  /accounts/session/get/         - Read the demo session value
//! GET  /accounts/foo-bar/             - Static JSON
//!
//! # Blog
//! GET  /blog/articles/                - Published articles
//! GET  /blog/articles/{id}/           - Article detail
//! GET  /blog/feed/                    - RSS feed
//!
//! # REST API
//! /api/...                            - See `api`
//! ```

pub mod accounts;
pub mod api;
pub mod blog;
pub mod feeds;
pub mod orders;
pub mod products;
pub mod shop;

use std::future::Future;

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Router,
    body::Bytes,
    http::header,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;

use crate::cache::{CacheKey, CacheValue, cache_page};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Shared "are you sure?" page for deletes and archives.
#[derive(Template, WebTemplate)]
#[template(path = "confirm.html")]
pub struct ConfirmTemplate {
    pub heading: String,
    pub question: String,
    pub action: String,
    pub submit: &'static str,
    pub back: String,
}

fn json_response(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Serve `key` from the cache, or compute, serialize and store it for
/// `EXPORT_CACHE_TTL`.
///
/// # Errors
///
/// Returns whatever `compute` fails with, or `AppError::Internal` if the
/// payload cannot be serialized.
pub async fn cached_json<T, F>(state: &AppState, key: CacheKey, compute: F) -> Result<Response>
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    if let Some(CacheValue::Json(body)) = state.cache().get(&key).await {
        tracing::debug!(key = %key, "Serving export from cache");
        return Ok(json_response(body));
    }

    let payload = compute.await?;
    let body = Bytes::from(
        serde_json::to_vec(&payload).map_err(|e| AppError::Internal(e.to_string()))?,
    );
    state
        .cache()
        .set(
            key,
            CacheValue::Json(body.clone()),
            state.config().export_cache_ttl,
        )
        .await;

    Ok(json_response(body))
}

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products/", get(products::list))
        .route(
            "/products/create/",
            get(products::create_page).post(products::create),
        )
        .route("/products/export/", get(products::export))
        .route("/products/feed/", get(feeds::products_feed))
        .route("/products/{id}/", get(products::show))
        .route(
            "/products/{id}/update/",
            get(products::update_page).post(products::update),
        )
        .route("/products/{id}/images/", post(products::upload_images))
        .route(
            "/products/{id}/delete/",
            get(products::delete_page).post(products::delete),
        )
        .route(
            "/products/{id}/archive/",
            get(products::archive_page).post(products::archive),
        )
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/", get(orders::list))
        .route(
            "/orders/create/",
            get(orders::create_page).post(orders::create),
        )
        .route("/orders/export/", get(orders::export))
        .route("/orders/{id}/", get(orders::detail))
        .route(
            "/orders/{id}/update/",
            get(orders::update_page).post(orders::update),
        )
        .route(
            "/orders/{id}/delete/",
            get(orders::delete_page).post(orders::delete),
        )
        .route("/users/{id}/orders/", get(orders::user_orders))
        .route("/users/{id}/orders/export/", get(orders::user_orders_export))
}

/// Create the account routes router. `cookie/get/` sits behind the page cache.
pub fn account_routes(state: &AppState) -> Router<AppState> {
    let cached = Router::new()
        .route("/accounts/cookie/get/", get(accounts::get_cookie))
        .route_layer(from_fn_with_state(state.clone(), cache_page));

    Router::new()
        .merge(cached)
        .route(
            "/accounts/login/",
            get(accounts::login_page).post(accounts::login),
        )
        .route("/accounts/logout/", post(accounts::logout))
        .route(
            "/accounts/register/",
            get(accounts::register_page).post(accounts::register),
        )
        .route(
            "/accounts/about-me/",
            get(accounts::about_me).post(accounts::update_about_me),
        )
        .route("/accounts/users/", get(accounts::users_list))
        .route(
            "/accounts/users/{id}/",
            get(accounts::user_details).post(accounts::update_user_avatar),
        )
        .route("/accounts/cookie/set/", get(accounts::set_cookie))
        .route("/accounts/session/set/", get(accounts::set_session))
        .route("/accounts/session/get/", get(accounts::get_session))
        .route("/accounts/foo-bar/", get(accounts::foo_bar))
}

/// Create all routes.
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(shop::index))
        .route("/sitemap.xml", get(feeds::sitemap))
        .merge(product_routes())
        .merge(order_routes())
        .merge(account_routes(state))
        .merge(blog::router())
        .merge(api::router(state))
}
