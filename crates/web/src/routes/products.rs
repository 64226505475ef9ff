//! Product route handlers.
//!
//! List and detail are public. Create needs `shop.add_product`; update,
//! image upload, archive and delete also need the caller to be the creator.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Multipart, Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use tracing::instrument;

use mysite_core::ProductId;

use crate::authz::{Check, authorize, perms};
use crate::cache::CacheKey;
use crate::db::ProductQuery;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::forms::{FormErrors, ProductForm};
use crate::middleware::OptionalAuth;
use crate::models::{CurrentUser, NewProduct, Product, ProductImage};
use crate::services::exports;
use crate::state::AppState;

use super::{ConfirmTemplate, cached_json};

/// Product listing page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/products_list.html")]
pub struct ProductsListTemplate {
    pub products: Vec<Product>,
}

/// Product detail page template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/product_details.html")]
pub struct ProductDetailsTemplate {
    pub product: Product,
    pub images: Vec<ProductImage>,
}

/// Create/update form template.
#[derive(Template, WebTemplate)]
#[template(path = "shop/product_form.html")]
pub struct ProductFormTemplate {
    pub heading: String,
    pub action: String,
    pub submit: &'static str,
    pub back: String,
    pub form: ProductForm,
    pub errors: FormErrors,
}

impl ProductFormTemplate {
    fn create(form: ProductForm, errors: FormErrors) -> Self {
        Self {
            heading: "Create product".to_string(),
            action: "/products/create/".to_string(),
            submit: "Create",
            back: "/products/".to_string(),
            form,
            errors,
        }
    }

    fn update(id: ProductId, form: ProductForm, errors: FormErrors) -> Self {
        Self {
            heading: format!("Update product #{id}"),
            action: format!("/products/{id}/update/"),
            submit: "Update",
            back: format!("/products/{id}/"),
            form,
            errors,
        }
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

/// Load the product and run the owner-gated checks for `permission`.
async fn load_owned(
    state: &AppState,
    user: Option<&CurrentUser>,
    id: ProductId,
    permission: &'static str,
    path: &str,
) -> Result<(Product, CurrentUser)> {
    let product = load(state, id).await?;
    let user = authorize(
        state,
        user,
        &[
            Check::Authenticated,
            Check::Permission(permission),
            Check::Owner(product.created_by),
        ],
        path,
    )
    .await?;
    Ok((product, user))
}

/// Display non-archived products.
#[instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let products = state.repos().products.list(&ProductQuery::active()).await?;
    Ok(ProductsListTemplate { products })
}

/// Display a product with its images. Archived products are still shown.
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<impl IntoResponse> {
    let (product, images) = state
        .repos()
        .products
        .get_with_images(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;
    Ok(ProductDetailsTemplate { product, images })
}

/// Display the create form.
pub async fn create_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
) -> Result<Response> {
    authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::ADD_PRODUCT)],
        uri.path(),
    )
    .await?;
    Ok(ProductFormTemplate::create(ProductForm::default(), FormErrors::new()).into_response())
}

/// Handle the create form. The current user becomes the creator.
#[instrument(skip(state, user, form))]
pub async fn create(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    uri: Uri,
    Form(form): Form<ProductForm>,
) -> Result<Response> {
    let user = authorize(
        &state,
        user.as_ref(),
        &[Check::Authenticated, Check::Permission(perms::ADD_PRODUCT)],
        uri.path(),
    )
    .await?;

    let fields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                ProductFormTemplate::create(form, errors),
            )
                .into_response());
        }
    };

    let product = state
        .repos()
        .products
        .create(NewProduct {
            fields,
            created_by: Some(user.id),
        })
        .await?;

    tracing::info!(product_id = %product.id, user_id = %user.id, "Product created");
    add_breadcrumb(
        "shop",
        "Created product",
        Some(&[("product_id", &product.id.to_string())]),
    );

    Ok(Redirect::to("/products/").into_response())
}

/// Display the update form.
pub async fn update_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
) -> Result<Response> {
    let (product, _) =
        load_owned(&state, user.as_ref(), id, perms::CHANGE_PRODUCT, uri.path()).await?;
    Ok(
        ProductFormTemplate::update(id, ProductForm::from_product(&product), FormErrors::new())
            .into_response(),
    )
}

/// Handle the update form.
#[instrument(skip(state, user, form))]
pub async fn update(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
    Form(form): Form<ProductForm>,
) -> Result<Response> {
    let (product, _) =
        load_owned(&state, user.as_ref(), id, perms::CHANGE_PRODUCT, uri.path()).await?;

    let fields = match form.validate() {
        Ok(fields) => fields,
        Err(errors) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                ProductFormTemplate::update(id, form, errors),
            )
                .into_response());
        }
    };

    // The form has no archive checkbox; keep the flag as it was.
    let fields = crate::models::ProductFields {
        archived: product.archived,
        ..fields
    };
    state
        .repos()
        .products
        .update(id, &fields)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;

    tracing::info!(product_id = %id, "Product updated");
    Ok(Redirect::to(&format!("/products/{id}/")).into_response())
}

/// Store every `images` file of a multipart body as a product image.
#[instrument(skip(state, user, multipart))]
pub async fn upload_images(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
    mut multipart: Multipart,
) -> Result<Response> {
    load_owned(&state, user.as_ref(), id, perms::CHANGE_PRODUCT, uri.path()).await?;

    let mut stored = 0_usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("images") {
            continue;
        }
        let filename = field.file_name().unwrap_or("image").to_owned();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if data.is_empty() {
            continue;
        }

        let path = state.media().save_product_image(id, &filename, &data).await?;
        state.repos().products.add_image(id, &path, "").await?;
        stored += 1;
    }

    if stored == 0 {
        return Err(AppError::BadRequest("No images were submitted".to_string()));
    }

    tracing::info!(product_id = %id, images = stored, "Product images uploaded");
    Ok(Redirect::to(&format!("/products/{id}/")).into_response())
}

/// Display the delete confirmation.
pub async fn delete_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
) -> Result<Response> {
    let (product, _) =
        load_owned(&state, user.as_ref(), id, perms::DELETE_PRODUCT, uri.path()).await?;
    Ok(ConfirmTemplate {
        heading: format!("Delete product {}", product.name),
        question: format!("Are you sure you want to delete \"{}\"?", product.name),
        action: format!("/products/{id}/delete/"),
        submit: "Delete",
        back: format!("/products/{id}/"),
    }
    .into_response())
}

/// Hard delete.
#[instrument(skip(state, user))]
pub async fn delete(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
) -> Result<Response> {
    load_owned(&state, user.as_ref(), id, perms::DELETE_PRODUCT, uri.path()).await?;
    if !state.repos().products.delete(id).await? {
        return Err(AppError::NotFound(format!("product {id}")));
    }
    tracing::info!(product_id = %id, "Product deleted");
    Ok(Redirect::to("/products/").into_response())
}

/// Display the archive confirmation.
pub async fn archive_page(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
) -> Result<Response> {
    let (product, _) =
        load_owned(&state, user.as_ref(), id, perms::DELETE_PRODUCT, uri.path()).await?;
    Ok(ConfirmTemplate {
        heading: format!("Archive product {}", product.name),
        question: format!("Are you sure you want to archive \"{}\"?", product.name),
        action: format!("/products/{id}/archive/"),
        submit: "Archive",
        back: format!("/products/{id}/"),
    }
    .into_response())
}

/// Soft delete: set `archived`.
#[instrument(skip(state, user))]
pub async fn archive(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<ProductId>,
    uri: Uri,
) -> Result<Response> {
    load_owned(&state, user.as_ref(), id, perms::DELETE_PRODUCT, uri.path()).await?;
    if !state.repos().products.archive(id).await? {
        return Err(AppError::NotFound(format!("product {id}")));
    }
    tracing::info!(product_id = %id, "Product archived");
    Ok(Redirect::to("/products/").into_response())
}

/// Every product as JSON, cached for `EXPORT_CACHE_TTL`.
#[instrument(skip(state))]
pub async fn export(State(state): State<AppState>) -> Result<Response> {
    cached_json(&state, CacheKey::ProductsExport, async {
        Ok::<_, AppError>(exports::products(state.repos().products.as_ref()).await?)
    })
    .await
}
