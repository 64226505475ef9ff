//! OpenAPI document and Swagger UI.

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::{orders, products};
use crate::state::AppState;

pub const SCHEMA_PATH: &str = "/api/schema/";
pub const SWAGGER_UI_PATH: &str = "/api/schema/swagger-ui";

#[derive(OpenApi)]
#[openapi(
    info(title = "mysite API", description = "Products and orders"),
    paths(
        products::list,
        products::create,
        products::retrieve,
        products::update,
        products::partial_update,
        products::destroy,
        products::download_csv,
        products::upload_csv,
        orders::list,
        orders::create,
        orders::retrieve,
        orders::update,
        orders::partial_update,
        orders::destroy,
        orders::download_csv,
        orders::upload_csv,
    ),
    components(
        schemas(
            products::ProductOut,
            products::ProductPayload,
            orders::OrderOut,
            orders::OrderPayload,
        )
    ),
    tags(
        (name = "products", description = "Shop products"),
        (name = "orders", description = "Shop orders"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Serve the document at `/api/schema/` and the UI next to it.
pub fn router() -> Router<AppState> {
    Router::new().merge(SwaggerUi::new(SWAGGER_UI_PATH).url(SCHEMA_PATH, openapi()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_both_viewsets() {
        let doc = openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/api/products/",
            "/api/products/{id}/",
            "/api/products/download_csv/",
            "/api/products/upload_csv/",
            "/api/orders/",
            "/api/orders/{id}/",
            "/api/orders/download_csv/",
            "/api/orders/upload_csv/",
        ] {
            assert!(paths.contains(&path), "missing {path}");
        }

        let schemas = doc.components.unwrap().schemas;
        assert!(schemas.contains_key("ProductOut"));
        assert!(schemas.contains_key("OrderOut"));
    }
}
