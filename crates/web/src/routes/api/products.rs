//! Product viewset.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};

use mysite_core::{Discount, Price, ProductId, UserId};

use super::{
    Paginated, TextOrNumber, check_page_in_range, csv_attachment, paginate, parse_bool,
    parse_filter, parse_page_number, read_upload,
};
use crate::db::{Page, ProductQuery, ProductSortField, SortKey};
use crate::error::{AppError, Result};
use crate::forms::{FormErrors, ProductForm};
use crate::middleware::OptionalAuth;
use crate::models::{NewProduct, Product};
use crate::services::csv::{self, PRODUCTS_FILENAME};
use crate::state::AppState;

/// Product as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductOut {
    #[schema(value_type = i32)]
    pub pk: ProductId,
    pub name: String,
    pub description: String,
    /// Decimal string with two places.
    #[schema(value_type = String, example = "123.45")]
    pub price: Price,
    #[schema(value_type = i16, minimum = 0, maximum = 100)]
    pub discount: Discount,
    pub created_at: DateTime<Utc>,
    pub archived: bool,
    #[schema(value_type = Option<i32>)]
    pub created_by: Option<UserId>,
    pub preview: Option<String>,
}

impl From<Product> for ProductOut {
    fn from(p: Product) -> Self {
        Self {
            pk: p.id,
            name: p.name,
            description: p.description,
            price: p.price,
            discount: p.discount,
            created_at: p.created_at,
            archived: p.archived,
            created_by: p.created_by,
            preview: p.preview,
        }
    }
}

/// Writable product fields. Omitted fields keep their current value on
/// `PATCH` and take their default otherwise.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProductPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Option<String>, example = "123.45")]
    pub price: Option<TextOrNumber>,
    #[schema(value_type = Option<i16>)]
    pub discount: Option<TextOrNumber>,
    pub archived: Option<bool>,
    pub preview: Option<String>,
}

impl ProductPayload {
    /// Overlay the given fields onto `form`.
    #[must_use]
    pub fn apply(self, mut form: ProductForm) -> ProductForm {
        if let Some(name) = self.name {
            form.name = name;
        }
        if let Some(description) = self.description {
            form.description = description;
        }
        if let Some(price) = self.price {
            form.price = price.into_text();
        }
        if let Some(discount) = self.discount {
            form.discount = discount.into_text();
        }
        if let Some(archived) = self.archived {
            form.archived = archived.then(|| "on".to_owned());
        }
        if let Some(preview) = self.preview {
            form.preview = preview;
        }
        form
    }
}

/// Product list filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilters {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub discount: Option<String>,
    pub archived: Option<String>,
    /// Case-insensitive match on name and description.
    pub search: Option<String>,
    /// Comma separated; any of `name`, `price`, `discount`, `-` prefix for descending.
    pub ordering: Option<String>,
    pub page: Option<String>,
}

impl ProductFilters {
    /// Build the query, without paging.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for malformed values or ordering fields.
    pub fn to_query(&self) -> Result<ProductQuery> {
        let mut errors = FormErrors::new();

        let price = parse_filter::<Price>(self.price.as_deref(), "price", &mut errors);
        let discount = parse_filter::<Discount>(self.discount.as_deref(), "discount", &mut errors);
        let archived = parse_bool(self.archived.as_deref(), "archived", &mut errors);
        let ordering = self.ordering.as_deref().map_or_else(
            || Ok(Vec::new()),
            |raw| SortKey::parse_list(raw, ProductSortField::from_api_name),
        );
        let ordering = ordering.unwrap_or_else(|field| {
            errors.add("ordering", format!("Cannot order by \"{field}\"."));
            Vec::new()
        });

        let query = ProductQuery {
            name: self.name.clone().filter(|v| !v.is_empty()),
            description: self.description.clone().filter(|v| !v.is_empty()),
            price,
            discount,
            archived,
            search: self.search.clone().filter(|v| !v.trim().is_empty()),
            ordering,
            page: None,
        };
        errors.into_result(query).map_err(AppError::Validation)
    }
}

async fn load(state: &AppState, id: ProductId) -> Result<Product> {
    state
        .repos()
        .products
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))
}

#[utoipa::path(
    get,
    path = "/api/products/",
    params(ProductFilters),
    responses(
        (status = 200, description = "One page of products", body = Paginated<ProductOut>),
        (status = 400, description = "Invalid filter or ordering"),
        (status = 404, description = "Invalid page")
    ),
    tag = "products",
)]
/// List products.
#[instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<ProductFilters>,
    uri: Uri,
) -> Result<Json<Paginated<ProductOut>>> {
    let mut query = filters.to_query()?;
    let page = Page {
        number: parse_page_number(filters.page.as_deref())?,
        size: state.config().api_page_size,
    };

    let repo = &state.repos().products;
    let count = repo.count(&query).await?;
    check_page_in_range(page, count)?;

    query.page = Some(page);
    let results = repo.list(&query).await?.into_iter().map(ProductOut::from).collect();

    Ok(Json(paginate(state.config(), &uri, page, count, results)))
}

#[utoipa::path(
    post,
    path = "/api/products/",
    request_body = ProductPayload,
    responses(
        (status = 201, description = "Product created", body = ProductOut),
        (status = 400, description = "Field errors")
    ),
    tag = "products",
)]
/// Create a product. The session user, if any, becomes the creator.
#[instrument(skip(state, user, payload))]
pub async fn create(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Json(payload): Json<ProductPayload>,
) -> Result<Response> {
    let fields = payload
        .apply(ProductForm::default())
        .validate()
        .map_err(AppError::Validation)?;

    let product = state
        .repos()
        .products
        .create(NewProduct {
            fields,
            created_by: user.map(|u| u.id),
        })
        .await?;
    tracing::info!(product_id = %product.id, "Product created via API");

    Ok((StatusCode::CREATED, Json(ProductOut::from(product))).into_response())
}

#[utoipa::path(
    get,
    path = "/api/products/{id}/",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "The product", body = ProductOut),
        (status = 404, description = "No such product")
    ),
    tag = "products",
)]
/// Retrieve one product, archived or not.
#[instrument(skip(state))]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductOut>> {
    Ok(Json(load(&state, id).await?.into()))
}

async fn save(state: &AppState, id: ProductId, form: &ProductForm) -> Result<Json<ProductOut>> {
    let fields = form.validate().map_err(AppError::Validation)?;
    let product = state
        .repos()
        .products
        .update(id, &fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;
    tracing::info!(product_id = %id, "Product updated via API");
    Ok(Json(product.into()))
}

#[utoipa::path(
    put,
    path = "/api/products/{id}/",
    params(("id" = i32, Path, description = "Product id")),
    request_body = ProductPayload,
    responses(
        (status = 200, description = "Product replaced", body = ProductOut),
        (status = 400, description = "Field errors"),
        (status = 404, description = "No such product")
    ),
    tag = "products",
)]
/// Replace every writable field.
#[instrument(skip(state, payload))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Json(payload): Json<ProductPayload>,
) -> Result<Json<ProductOut>> {
    load(&state, id).await?;
    save(&state, id, &payload.apply(ProductForm::default())).await
}

#[utoipa::path(
    patch,
    path = "/api/products/{id}/",
    params(("id" = i32, Path, description = "Product id")),
    request_body = ProductPayload,
    responses(
        (status = 200, description = "Product updated", body = ProductOut),
        (status = 400, description = "Field errors"),
        (status = 404, description = "No such product")
    ),
    tag = "products",
)]
/// Update only the given fields.
#[instrument(skip(state, payload))]
pub async fn partial_update(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    Json(payload): Json<ProductPayload>,
) -> Result<Json<ProductOut>> {
    let current = load(&state, id).await?;
    save(&state, id, &payload.apply(ProductForm::from_product(&current))).await
}

#[utoipa::path(
    delete,
    path = "/api/products/{id}/",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product deleted"),
        (status = 404, description = "No such product")
    ),
    tag = "products",
)]
/// Hard delete.
#[instrument(skip(state))]
pub async fn destroy(State(state): State<AppState>, Path(id): Path<ProductId>) -> Result<StatusCode> {
    if !state.repos().products.delete(id).await? {
        return Err(AppError::NotFound(format!("product {id}")));
    }
    tracing::info!(product_id = %id, "Product deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/products/download_csv/",
    params(ProductFilters),
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 400, description = "Invalid filter or ordering")
    ),
    tag = "products",
)]
/// Export the filtered products as CSV. Paginated only when `page` is given.
#[instrument(skip(state))]
pub async fn download_csv(
    State(state): State<AppState>,
    Query(filters): Query<ProductFilters>,
) -> Result<Response> {
    let mut query = filters.to_query()?;
    let repo = &state.repos().products;

    if filters.page.is_some() {
        let page = Page {
            number: parse_page_number(filters.page.as_deref())?,
            size: state.config().api_page_size,
        };
        check_page_in_range(page, repo.count(&query).await?)?;
        query.page = Some(page);
    }

    let products = repo.list(&query).await?;
    let body = csv::write_products(&products)?;
    tracing::info!(rows = products.len(), "Products exported as CSV");
    Ok(csv_attachment(PRODUCTS_FILENAME, body))
}

#[utoipa::path(
    post,
    path = "/api/products/upload_csv/",
    request_body(content_type = "multipart/form-data", description = "Multipart field `file` holding the CSV"),
    responses(
        (status = 200, description = "Created products", body = Vec<ProductOut>),
        (status = 400, description = "Malformed CSV or invalid rows; nothing is written")
    ),
    tag = "products",
)]
/// Import products from CSV. Every row is validated before any is inserted.
#[instrument(skip(state, user, multipart))]
pub async fn upload_csv(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    mut multipart: Multipart,
) -> Result<Json<Vec<ProductOut>>> {
    let data = read_upload(&mut multipart).await?;
    let rows = csv::read_products(&data)?;

    let created_by = user.map(|u| u.id);
    let products = state
        .repos()
        .products
        .create_many(
            rows.into_iter()
                .map(|fields| NewProduct { fields, created_by })
                .collect(),
        )
        .await?;
    tracing::info!(rows = products.len(), "Products imported from CSV");

    Ok(Json(products.into_iter().map(ProductOut::from).collect()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_to_query() {
        let filters = ProductFilters {
            price: Some("12.5".to_owned()),
            archived: Some("false".to_owned()),
            ordering: Some("-price,name".to_owned()),
            ..ProductFilters::default()
        };
        let query = filters.to_query().unwrap();
        assert_eq!(query.price, Some(Price::parse("12.50").unwrap()));
        assert_eq!(query.archived, Some(false));
        assert_eq!(
            query.ordering,
            vec![
                SortKey::desc(ProductSortField::Price),
                SortKey::asc(ProductSortField::Name)
            ]
        );
    }

    #[test]
    fn test_unknown_ordering_is_rejected() {
        let filters = ProductFilters {
            ordering: Some("created_by".to_owned()),
            ..ProductFilters::default()
        };
        assert!(matches!(filters.to_query(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_patch_payload_keeps_missing_fields() {
        let form = ProductForm {
            name: "Chair".to_owned(),
            price: "10.00".to_owned(),
            discount: "5".to_owned(),
            ..ProductForm::default()
        };
        let payload: ProductPayload = serde_json::from_str(r#"{"price": 12.5}"#).unwrap();
        let form = payload.apply(form);
        assert_eq!(form.name, "Chair");
        assert_eq!(form.price, "12.5");
        assert_eq!(form.discount, "5");
    }
}
