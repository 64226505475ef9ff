//! Order route handlers.
//!
//! Every order page needs a logged-in user. The per-user JSON export is the
//! one public route here.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form, Json,
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use tracing::instrument;

use mysite_core::{OrderId, UserId};

use crate::authz::{Check, authorize, perms};
use crate::cache::CacheKey;
use crate::db::{OrderQuery, RepositoryError};
use crate::error::{AppError, Result};
use crate::forms::{FormErrors, OrderForm};
use crate::middleware::OptionalAuth;
use crate::models::{OrderDetails, OrderFields, User};
use crate::services::exports;
use crate::state::AppState;

use super::{ConfirmTemplate, cached_json};

/// Order listing page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/orders_list.html")]
pub struct OrdersListTemplate {
    pub orders: Vec<OrderDetails>,
}

/// Order detail page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/order_details.html")]
pub struct OrderDetailsTemplate {
    pub details: OrderDetails,
}

/// Create/update form template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/order_form.html")]
pub struct OrderFormTemplate {
    pub heading: String,
    pub action: String,
    pub submit: &'static str,
    pub back: String,
    pub form: OrderForm,
    pub errors: FormErrors,
}

impl OrderFormTemplate {
    fn create(form: OrderForm, errors: FormErrors) -> Self {
        Self {
            heading: "Create order".to_string(),
            action: "/orders/create/".to_string(),
            submit: "Create",
            back: "/orders/".to_string(),
            form,
            errors,
        }
    }

    fn update(id: OrderId, form: OrderForm, errors: FormErrors) -> Self {
        Self {
            heading: format!("Update order #{id}"),
            action: format!("/orders/{id}/update/"),
            submit: "Update",
            back: format!("/orders/{id}/"),
            form,
            errors,
        }
    }

    fn invalid(self) -> Response {
        (StatusCode::BAD_REQUEST, self).into_response()
    }
}

/// Orders of one user page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/user_orders.html")]
pub struct UserOrdersTemplate {
    pub owner: User,
    pub orders: Vec<OrderDetails>,
}

async fn load(state: &AppState, id: OrderId) -> Result<OrderDetails> {
    state
        .repos()
        .orders
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))
}

async fn load_owner(state: &AppState, id: UserId) -> Result<User> {
    state
        .repos()
        .users
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))
}

/// Unknown user or product ids come back from the repository as a conflict;
/// show them on the form instead of failing the request.
fn conflict_as_form_error(err: RepositoryError) -> std::result::Result<FormErrors, AppError> {
    match err {
        RepositoryError::Conflict(message) => Ok(FormErrors::single(FormErrors::NON_FIELD, message)),
        other => Err(other.into()),
    }
}

/// Display every order with its user and products.
#[instrument(skip(state, user))]
pub async fn list(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
) -> Result<Response> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    let orders = state.repos().orders.list(&OrderQuery::detailed()).await?;
    Ok(OrdersListTemplate { orders }.into_response())
}

/// Display one order.
#[instrument(skip(state, user))]
pub async fn detail(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<OrderId>,
    uri: Uri,
) -> Result<Response> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    let details = load(&state, id).await?;
    Ok(OrderDetailsTemplate { details }.into_response())
}

/// Display the create form.
pub async fn create_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
) -> Result<Response> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    Ok(OrderFormTemplate::create(OrderForm::default(), FormErrors::new()).into_response())
}

/// Handle the create form.
#[instrument(skip(state, user, form))]
pub async fn create(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
    Form(form): Form<OrderForm>,
) -> Result<Response> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;

    let fields: OrderFields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => return Ok(OrderFormTemplate::create(form, errors).invalid()),
    };

    match state.repos().orders.create(&fields).await {
        Ok(details) => {
            tracing::info!(order_id = %details.order.id, "Order created");
            Ok(Redirect::to("/orders/").into_response())
        }
        Err(err) => {
            let errors = conflict_as_form_error(err)?;
            Ok(OrderFormTemplate::create(form, errors).invalid())
        }
    }
}

/// Display the update form.
pub async fn update_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<OrderId>,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::CHANGE_ORDER)],
        uri.path(),
    )
    .await?;
    let details = load(&state, id).await?;
    Ok(
        OrderFormTemplate::update(id, OrderForm::from_order(&details), FormErrors::new())
            .into_response(),
    )
}

/// Handle the update form. Product links are replaced.
#[instrument(skip(state, user, form))]
pub async fn update(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<OrderId>,
    uri: Uri,
    Form(form): Form<OrderForm>,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::CHANGE_ORDER)],
        uri.path(),
    )
    .await?;

    let fields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => return Ok(OrderFormTemplate::update(id, form, errors).invalid()),
    };

    match state.repos().orders.update(id, &fields).await {
        Ok(Some(_)) => {
            tracing::info!(order_id = %id, "Order updated");
            Ok(Redirect::to(&format!("/orders/{id}/")).into_response())
        }
        Ok(None) => Err(AppError::NotFound(format!("order {id}"))),
        Err(err) => {
            let errors = conflict_as_form_error(err)?;
            Ok(OrderFormTemplate::update(id, form, errors).invalid())
        }
    }
}

/// Display the delete confirmation.
pub async fn delete_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<OrderId>,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::DELETE_ORDER)],
        uri.path(),
    )
    .await?;
    load(&state, id).await?;
    Ok(ConfirmTemplate {
        heading: format!("Delete order #{id}"),
        question: format!("Are you sure you want to delete order #{id}?"),
        action: format!("/orders/{id}/delete/"),
        submit: "Delete",
        back: format!("/orders/{id}/"),
    }
    .into_response())
}

/// Delete the order and its product links.
#[instrument(skip(state, user))]
pub async fn delete(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<OrderId>,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::DELETE_ORDER)],
        uri.path(),
    )
    .await?;
    if !state.repos().orders.delete(id).await? {
        return Err(AppError::NotFound(format!("order {id}")));
    }
    tracing::info!(order_id = %id, "Order deleted");
    Ok(Redirect::to("/orders/").into_response())
}

/// Every order as JSON. Staff only, never cached.
#[instrument(skip(state, user))]
pub async fn export(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Staff],
        uri.path(),
    )
    .await?;
    let payload = exports::orders(state.repos().orders.as_ref(), &OrderQuery::default()).await?;
    Ok(Json(payload).into_response())
}

/// Display the orders of one user.
#[instrument(skip(state, user))]
pub async fn user_orders(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(user_id): Path<UserId>,
    uri: Uri,
) -> Result<Response> {
    authorize(&state, user.as_ref(), &[Check::Authenticated], uri.path()).await?;
    let owner = load_owner(&state, user_id).await?;
    let orders = state
        .repos()
        .orders
        .list(&OrderQuery::for_user(user_id))
        .await?;
    Ok(UserOrdersTemplate { owner, orders }.into_response())
}

/// The orders of one user as JSON, cached per user for `EXPORT_CACHE_TTL`.
#[instrument(skip(state))]
pub async fn user_orders_export(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Response> {
    load_owner(&state, user_id).await?;
    let query = OrderQuery::for_user(user_id);
    cached_json(&state, CacheKey::UserOrdersExport(user_id), async {
        Ok::<_, AppError>(exports::orders(state.repos().orders.as_ref(), &query).await?)
    })
    .await
}
