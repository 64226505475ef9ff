//! JSON REST API.
//!
//! # Route Structure
//!
//! ```text
//! GET    /api/products/                 - Paginated list (page cached)
//! POST   /api/products/                 - Create
//! GET    /api/products/{id}/            - Retrieve
//! PUT    /api/products/{id}/            - Full update
//! PATCH  /api/products/{id}/            - Partial update
//! DELETE /api/products/{id}/            - Delete
//! GET    /api/products/download_csv/    - CSV export, same filters as the list
//! POST   /api/products/upload_csv/      - CSV import (multipart field `file`)
//!
//! /api/orders/...                       - Same shape for orders
//!
//! GET    /api/schema/                   - OpenAPI document
//! GET    /api/schema/swagger-ui/        - Swagger UI
//! ```
//!
//! The list endpoints accept exact-match filters, `search`, `ordering` and
//! `page`. Invalid filter values and unknown ordering fields are a 400;
//! a page outside the result set is a 404.

pub mod openapi;
pub mod orders;
pub mod products;

use axum::{
    Router,
    extract::Multipart,
    http::{Uri, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use utoipa::ToSchema;

use crate::cache::cache_page;
use crate::config::WebConfig;
use crate::db::Page;
use crate::error::{AppError, Result};
use crate::forms::FormErrors;
use crate::state::AppState;

/// One page of a list: `{"count", "next", "previous", "results"}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct Paginated<T> {
    /// Rows matching the filters, across all pages.
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// A JSON value given either as a string or a number, such as `"12.50"`
/// or `12.5` for a price.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl TextOrNumber {
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Parse the raw `page` parameter. Anything but a positive integer is a 404.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an invalid page number.
pub fn parse_page_number(raw: Option<&str>) -> Result<u32> {
    match raw.map(str::trim) {
        None | Some("") => Ok(1),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::NotFound("Invalid page.".to_string())),
    }
}

/// Check that `page` exists for `count` rows. Page 1 always exists.
///
/// # Errors
///
/// Returns `AppError::NotFound` past the last page.
pub fn check_page_in_range(page: Page, count: u64) -> Result<()> {
    let size = u64::from(page.size.max(1));
    let pages = count.div_ceil(size).max(1);
    if u64::from(page.number) > pages {
        return Err(AppError::NotFound("Invalid page.".to_string()));
    }
    Ok(())
}

/// Absolute URL of the current request with `page` replaced. `None` drops it.
fn page_url(config: &WebConfig, uri: &Uri, page: Option<u32>) -> String {
    let mut url = config
        .absolute(uri.path())
        .unwrap_or_else(|_| config.base_url.clone());
    let kept: Vec<(String, String)> = form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if !kept.is_empty() || page.is_some() {
        let mut query = url.query_pairs_mut();
        query.clear().extend_pairs(&kept);
        if let Some(page) = page {
            query.append_pair("page", &page.to_string());
        }
    }
    url.into()
}

/// Wrap one page of `results` with its navigation links.
pub fn paginate<T>(
    config: &WebConfig,
    uri: &Uri,
    page: Page,
    count: u64,
    results: Vec<T>,
) -> Paginated<T> {
    let seen = u64::from(page.number) * u64::from(page.size);
    let next = (seen < count).then(|| page_url(config, uri, Some(page.number + 1)));
    let previous = match page.number {
        0 | 1 => None,
        2 => Some(page_url(config, uri, None)),
        n => Some(page_url(config, uri, Some(n - 1))),
    };
    Paginated {
        count,
        next,
        previous,
        results,
    }
}

/// Parse an optional exact-match filter value, recording a field error.
pub fn parse_filter<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &str,
    errors: &mut FormErrors,
) -> Option<T> {
    let raw = raw.map(str::trim).filter(|v| !v.is_empty())?;
    raw.parse().map_or_else(
        |_| {
            errors.add(field, "Enter a valid value.");
            None
        },
        Some,
    )
}

/// Parse `true`/`false` the way query strings spell them.
pub fn parse_bool(raw: Option<&str>, field: &str, errors: &mut FormErrors) -> Option<bool> {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => None,
        Some("true" | "1" | "yes" | "on") => Some(true),
        Some("false" | "0" | "no" | "off") => Some(false),
        Some(_) => {
            errors.add(field, "Enter a valid boolean.");
            None
        }
    }
}

/// Read the multipart field named `file`.
///
/// # Errors
///
/// Returns `AppError::BadRequest` if the body is malformed or has no file.
pub async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return Ok(data.to_vec());
        }
    }
    Err(AppError::Validation(FormErrors::single(
        "file",
        "No file was submitted.",
    )))
}

/// A CSV attachment response.
pub fn csv_attachment(filename: &str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// Create the API router. The product list is wrapped in the page cache.
pub fn router(state: &AppState) -> Router<AppState> {
    let cached_list = Router::new()
        .route("/api/products/", get(products::list).post(products::create))
        .route_layer(from_fn_with_state(state.clone(), cache_page));

    Router::new()
        .merge(cached_list)
        .route(
            "/api/products/{id}/",
            get(products::retrieve)
                .put(products::update)
                .patch(products::partial_update)
                .delete(products::destroy),
        )
        .route("/api/products/download_csv/", get(products::download_csv))
        .route("/api/products/upload_csv/", post(products::upload_csv))
        .route("/api/orders/", get(orders::list).post(orders::create))
        .route(
            "/api/orders/{id}/",
            get(orders::retrieve)
                .put(orders::update)
                .patch(orders::partial_update)
                .delete(orders::destroy),
        )
        .route("/api/orders/download_csv/", get(orders::download_csv))
        .route("/api/orders/upload_csv/", post(orders::upload_csv))
        .merge(openapi::router())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config() -> WebConfig {
        WebConfig::with_defaults(
            SecretString::from("memory:"),
            SecretString::from("k".repeat(32)),
        )
    }

    fn page(number: u32) -> Page {
        Page { number, size: 10 }
    }

    #[test]
    fn test_page_number() {
        assert_eq!(parse_page_number(None).unwrap(), 1);
        assert_eq!(parse_page_number(Some("3")).unwrap(), 3);
        assert!(parse_page_number(Some("0")).is_err());
        assert!(parse_page_number(Some("abc")).is_err());
    }

    #[test]
    fn test_page_range() {
        assert!(check_page_in_range(page(1), 0).is_ok());
        assert!(check_page_in_range(page(2), 10).is_err());
        assert!(check_page_in_range(page(2), 11).is_ok());
    }

    #[test]
    fn test_links_keep_filters_and_replace_page() {
        let config = config();
        let uri: Uri = "/api/products/?search=chair&page=2".parse().unwrap();
        let paginated = paginate(&config, &uri, page(2), 35, vec![()]);
        assert_eq!(
            paginated.next.as_deref(),
            Some("http://localhost:8000/api/products/?search=chair&page=3")
        );
        assert_eq!(
            paginated.previous.as_deref(),
            Some("http://localhost:8000/api/products/?search=chair")
        );

        let uri: Uri = "/api/products/?page=4".parse().unwrap();
        let paginated = paginate(&config, &uri, page(4), 35, vec![()]);
        assert_eq!(paginated.next, None);
        assert_eq!(
            paginated.previous.as_deref(),
            Some("http://localhost:8000/api/products/?page=3")
        );
    }

    #[test]
    fn test_links_decode_and_reencode_query_values() {
        let uri: Uri = "/api/products/?search=red%20chair&page=2&ordering=-price"
            .parse()
            .unwrap();
        let paginated = paginate(&config(), &uri, page(2), 35, vec![()]);
        assert_eq!(
            paginated.next.as_deref(),
            Some("http://localhost:8000/api/products/?search=red+chair&ordering=-price&page=3")
        );
        assert_eq!(
            paginated.previous.as_deref(),
            Some("http://localhost:8000/api/products/?search=red+chair&ordering=-price")
        );
    }

    #[test]
    fn test_filter_parsing_records_errors() {
        let mut errors = FormErrors::new();
        let price: Option<mysite_core::Price> = parse_filter(Some("abc"), "price", &mut errors);
        assert!(price.is_none());
        assert_eq!(parse_bool(Some("True"), "archived", &mut errors), Some(true));
        assert_eq!(parse_bool(Some("maybe"), "archived", &mut errors), None);
        assert_eq!(errors.get("price").len(), 1);
        assert_eq!(errors.get("archived").len(), 1);
    }

    #[test]
    fn test_text_or_number() {
        let value: TextOrNumber = serde_json::from_str("12.5").unwrap();
        assert_eq!(value.into_text(), "12.5");
        let value: TextOrNumber = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(value.into_text(), "12.50");
    }
}
