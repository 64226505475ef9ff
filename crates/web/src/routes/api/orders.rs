//! Order viewset.

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

use mysite_core::{OrderId, ProductId, UserId};

use super::{
    Paginated, TextOrNumber, check_page_in_range, csv_attachment, paginate, parse_filter,
    parse_page_number, read_upload,
};
use crate::db::{OrderQuery, OrderSortField, Page, SortKey};
use crate::error::{AppError, Result};
use crate::forms::{FormErrors, OrderForm, join_ids};
use crate::models::OrderDetails;
use crate::services::csv::{self, ORDERS_FILENAME};
use crate::state::AppState;

/// Order as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderOut {
    #[schema(value_type = i32)]
    pub pk: OrderId,
    pub delivery_address: String,
    pub promocode: String,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = i32)]
    pub user: UserId,
    /// Product ids.
    #[schema(value_type = Vec<i32>)]
    pub products: Vec<ProductId>,
}

impl From<OrderDetails> for OrderOut {
    fn from(d: OrderDetails) -> Self {
        let products = d.product_ids();
        Self {
            pk: d.order.id,
            delivery_address: d.order.delivery_address,
            promocode: d.order.promocode,
            created_at: d.order.created_at,
            user: d.order.user_id,
            products,
        }
    }
}

/// Writable order fields. Omitted fields keep their current value on
/// `PATCH` and take their default otherwise.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct OrderPayload {
    pub delivery_address: Option<String>,
    pub promocode: Option<String>,
    #[schema(value_type = Option<i32>)]
    pub user: Option<TextOrNumber>,
    #[schema(value_type = Option<Vec<i32>>)]
    pub products: Option<Vec<ProductId>>,
}

impl OrderPayload {
    /// Overlay the given fields onto `form`.
    #[must_use]
    pub fn apply(self, mut form: OrderForm) -> OrderForm {
        if let Some(address) = self.delivery_address {
            form.delivery_address = address;
        }
        if let Some(promocode) = self.promocode {
            form.promocode = promocode;
        }
        if let Some(user) = self.user {
            form.user = user.into_text();
        }
        if let Some(products) = self.products {
            form.products = join_ids(&products);
        }
        form
    }
}

/// Order list filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilters {
    pub delivery_address: Option<String>,
    pub promocode: Option<String>,
    /// RFC 3339 timestamp.
    pub created_at: Option<String>,
    pub user: Option<String>,
    /// Orders containing this product id.
    pub products: Option<String>,
    /// Case-insensitive match on the delivery address.
    pub search: Option<String>,
    /// Comma separated; any of `user`, `created_at`, `-` prefix for descending.
    pub ordering: Option<String>,
    pub page: Option<String>,
}

impl OrderFilters {
    /// Build the query with products loaded, without paging.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for malformed values or ordering fields.
    pub fn to_query(&self) -> Result<OrderQuery> {
        let mut errors = FormErrors::new();

        let created_at =
            parse_filter::<DateTime<Utc>>(self.created_at.as_deref(), "created_at", &mut errors);
        let user = parse_filter::<UserId>(self.user.as_deref(), "user", &mut errors);
        let product = parse_filter::<ProductId>(self.products.as_deref(), "products", &mut errors);
        let ordering = self.ordering.as_deref().map_or_else(
            || Ok(Vec::new()),
            |raw| SortKey::parse_list(raw, OrderSortField::from_api_name),
        );
        let ordering = ordering.unwrap_or_else(|field| {
            errors.add("ordering", format!("Cannot order by \"{field}\"."));
            Vec::new()
        });

        let query = OrderQuery {
            delivery_address: self.delivery_address.clone().filter(|v| !v.is_empty()),
            promocode: self.promocode.clone().filter(|v| !v.is_empty()),
            created_at,
            user,
            product,
            search: self.search.clone().filter(|v| !v.trim().is_empty()),
            ordering,
            page: None,
            with_user: false,
            with_products: true,
        };
        errors.into_result(query).map_err(AppError::Validation)
    }
}

async fn load(state: &AppState, id: OrderId) -> Result<OrderDetails> {
    state
        .repos()
        .orders
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))
}

#[utoipa::path(
    get,
    path = "/api/orders/",
    params(OrderFilters),
    responses(
        (status = 200, description = "One page of orders", body = Paginated<OrderOut>),
        (status = 400, description = "Invalid filter or ordering"),
        (status = 404, description = "Invalid page")
    ),
    tag = "orders",
)]
/// List orders.
#[instrument(skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
    uri: Uri,
) -> Result<Json<Paginated<OrderOut>>> {
    let mut query = filters.to_query()?;
    let page = Page {
        number: parse_page_number(filters.page.as_deref())?,
        size: state.config().api_page_size,
    };

    let repo = &state.repos().orders;
    let count = repo.count(&query).await?;
    check_page_in_range(page, count)?;

    query.page = Some(page);
    let results = repo.list(&query).await?.into_iter().map(OrderOut::from).collect();

    Ok(Json(paginate(state.config(), &uri, page, count, results)))
}

async fn save_new(state: &AppState, form: &OrderForm) -> Result<OrderOut> {
    let fields = form.validate().map_err(AppError::Validation)?;
    let details = state.repos().orders.create(&fields).await?;
    tracing::info!(order_id = %details.order.id, "Order created via API");
    Ok(details.into())
}

#[utoipa::path(
    post,
    path = "/api/orders/",
    request_body = OrderPayload,
    responses(
        (status = 201, description = "Order created", body = OrderOut),
        (status = 400, description = "Field errors or unknown user/product")
    ),
    tag = "orders",
)]
/// Create an order with its product links.
#[instrument(skip(state, payload))]
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<OrderPayload>,
) -> Result<Response> {
    let order = save_new(&state, &payload.apply(OrderForm::default())).await?;
    Ok((StatusCode::CREATED, Json(order)).into_response())
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}/",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order", body = OrderOut),
        (status = 404, description = "No such order")
    ),
    tag = "orders",
)]
/// Retrieve one order.
#[instrument(skip(state))]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderOut>> {
    Ok(Json(load(&state, id).await?.into()))
}

async fn save(state: &AppState, id: OrderId, form: &OrderForm) -> Result<Json<OrderOut>> {
    let fields = form.validate().map_err(AppError::Validation)?;
    let details = state
        .repos()
        .orders
        .update(id, &fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    tracing::info!(order_id = %id, "Order updated via API");
    Ok(Json(details.into()))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}/",
    params(("id" = i32, Path, description = "Order id")),
    request_body = OrderPayload,
    responses(
        (status = 200, description = "Order replaced", body = OrderOut),
        (status = 400, description = "Field errors"),
        (status = 404, description = "No such order")
    ),
    tag = "orders",
)]
/// Replace every writable field, product links included.
#[instrument(skip(state, payload))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(payload): Json<OrderPayload>,
) -> Result<Json<OrderOut>> {
    load(&state, id).await?;
    save(&state, id, &payload.apply(OrderForm::default())).await
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/",
    params(("id" = i32, Path, description = "Order id")),
    request_body = OrderPayload,
    responses(
        (status = 200, description = "Order updated", body = OrderOut),
        (status = 400, description = "Field errors"),
        (status = 404, description = "No such order")
    ),
    tag = "orders",
)]
/// Update only the given fields.
#[instrument(skip(state, payload))]
pub async fn partial_update(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
    Json(payload): Json<OrderPayload>,
) -> Result<Json<OrderOut>> {
    let current = load(&state, id).await?;
    save(&state, id, &payload.apply(OrderForm::from_order(&current))).await
}

#[utoipa::path(
    delete,
    path = "/api/orders/{id}/",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 404, description = "No such order")
    ),
    tag = "orders",
)]
/// Delete the order and its product links.
#[instrument(skip(state))]
pub async fn destroy(State(state): State<AppState>, Path(id): Path<OrderId>) -> Result<StatusCode> {
    if !state.repos().orders.delete(id).await? {
        return Err(AppError::NotFound(format!("order {id}")));
    }
    tracing::info!(order_id = %id, "Order deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/orders/download_csv/",
    params(OrderFilters),
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv", body = String),
        (status = 400, description = "Invalid filter or ordering")
    ),
    tag = "orders",
)]
/// Export the filtered orders as CSV. Paginated only when `page` is given.
#[instrument(skip(state))]
pub async fn download_csv(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
) -> Result<Response> {
    let mut query = filters.to_query()?;
    let repo = &state.repos().orders;

    if filters.page.is_some() {
        let page = Page {
            number: parse_page_number(filters.page.as_deref())?,
            size: state.config().api_page_size,
        };
        check_page_in_range(page, repo.count(&query).await?)?;
        query.page = Some(page);
    }

    let orders = repo.list(&query).await?;
    let body = csv::write_orders(&orders)?;
    tracing::info!(rows = orders.len(), "Orders exported as CSV");
    Ok(csv_attachment(ORDERS_FILENAME, body))
}

#[utoipa::path(
    post,
    path = "/api/orders/upload_csv/",
    request_body(content_type = "multipart/form-data", description = "Multipart field `file` holding the CSV"),
    responses(
        (status = 200, description = "Created orders", body = Vec<OrderOut>),
        (status = 400, description = "Malformed CSV or invalid rows; nothing is written")
    ),
    tag = "orders",
)]
/// Import orders from CSV in one transaction. `created_at` is ignored.
#[instrument(skip(state, multipart))]
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<OrderOut>>> {
    let data = read_upload(&mut multipart).await?;
    let rows = csv::read_orders(&data)?;
    let orders = state.repos().orders.create_many(rows).await?;
    tracing::info!(rows = orders.len(), "Orders imported from CSV");
    Ok(Json(orders.into_iter().map(OrderOut::from).collect()))
}
