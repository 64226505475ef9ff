//! Data access for mysite.
//!
//! # Tables
//!
//! - `auth_user`, `auth_group`, `auth_permission` and their link tables
//! - `auth_profile` - one row per user
//! - `shop_product`, `shop_product_image`
//! - `shop_order`, `shop_order_products`
//! - `blog_article`
//! - `tower_sessions.session` - created by the session store migration
//!
//! Handlers only see the repository traits below. [`Repositories::postgres`]
//! wires the sqlx implementations; [`Repositories::in_memory`] wires
//! [`MemoryDatabase`], used by tests and the local demo mode.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/web/migrations/` and run via:
//! ```bash
//! cargo run -p mysite-cli -- migrate
//! ```

pub mod articles;
pub mod memory;
pub mod orders;
pub mod products;
pub mod query;
pub mod users;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use mysite_core::{ArticleId, Discount, GroupId, OrderId, ProductId, UserId, Username};

use crate::models::{
    Article, NewArticle, NewProduct, NewUser, OrderDetails, OrderFields, OrderTotals, Product,
    ProductFields, ProductImage, Profile, User,
};

pub use articles::PgArticleRepository;
pub use memory::MemoryDatabase;
pub use orders::PgOrderRepository;
pub use products::PgProductRepository;
pub use query::{ArticleQuery, OrderQuery, OrderSortField, Page, ProductQuery, ProductSortField, SortKey};
pub use users::PgUserRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate username, unknown product).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map constraint violations on writes to [`RepositoryError::Conflict`].
pub(crate) fn map_write_error(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict(format!("{what} already exists"));
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::Conflict(format!("{what} references a missing row"));
        }
    }
    RepositoryError::Database(e)
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Products and their images.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError>;

    /// Number of rows matching the query's filters, ignoring its page.
    async fn count(&self, query: &ProductQuery) -> Result<u64, RepositoryError>;

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Product plus its images in one call (the detail page's join hint).
    async fn get_with_images(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<ProductImage>)>, RepositoryError>;

    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError>;

    /// Insert every product or none of them.
    async fn create_many(&self, products: Vec<NewProduct>) -> Result<Vec<Product>, RepositoryError>;

    /// Overwrite the writable fields. `Ok(None)` if the product is gone.
    async fn update(
        &self,
        id: ProductId,
        fields: &ProductFields,
    ) -> Result<Option<Product>, RepositoryError>;

    /// Soft delete. Returns `false` if the product does not exist.
    async fn archive(&self, id: ProductId) -> Result<bool, RepositoryError>;

    /// Hard delete. Returns `false` if the product does not exist.
    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError>;

    async fn add_image(
        &self,
        id: ProductId,
        image: &str,
        description: &str,
    ) -> Result<ProductImage, RepositoryError>;

    /// Set `discount` on every product whose name contains `needle`
    /// (case-sensitive). Returns the number of rows changed.
    async fn set_discount_where_name_contains(
        &self,
        needle: &str,
        discount: Discount,
    ) -> Result<u64, RepositoryError>;
}

/// Orders and their product links.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn list(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, RepositoryError>;

    async fn count(&self, query: &OrderQuery) -> Result<u64, RepositoryError>;

    /// Order with its user and products.
    async fn get(&self, id: OrderId) -> Result<Option<OrderDetails>, RepositoryError>;

    /// Insert the order and its product links in one transaction.
    async fn create(&self, fields: &OrderFields) -> Result<OrderDetails, RepositoryError>;

    /// Insert every order or none of them.
    async fn create_many(
        &self,
        orders: Vec<OrderFields>,
    ) -> Result<Vec<OrderDetails>, RepositoryError>;

    /// Overwrite the order and replace its product links.
    async fn update(
        &self,
        id: OrderId,
        fields: &OrderFields,
    ) -> Result<Option<OrderDetails>, RepositoryError>;

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError>;

    /// In one transaction: look up `username`, get or create its order with
    /// this address and promocode, and link every non-archived product.
    ///
    /// Returns the order and whether it was created. Fails with
    /// [`RepositoryError::NotFound`] if the user does not exist.
    async fn get_or_create_with_active_products(
        &self,
        username: &Username,
        delivery_address: &str,
        promocode: &str,
    ) -> Result<(OrderDetails, bool), RepositoryError>;

    /// Product count and price total per order, ordered by id.
    async fn totals(&self) -> Result<Vec<OrderTotals>, RepositoryError>;
}

/// Blog articles.
#[async_trait]
pub trait ArticleRepository: Send + Sync {
    async fn list(&self, query: &ArticleQuery) -> Result<Vec<Article>, RepositoryError>;

    /// Any article by id, drafts included.
    async fn get(&self, id: ArticleId) -> Result<Option<Article>, RepositoryError>;

    async fn create(&self, article: NewArticle) -> Result<Article, RepositoryError>;
}

/// Users, profiles, groups and permissions.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn get_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;

    /// The user and its stored password hash, for login.
    async fn get_credentials(
        &self,
        username: &Username,
    ) -> Result<Option<(User, String)>, RepositoryError>;

    /// All users ordered by id.
    async fn list(&self) -> Result<Vec<User>, RepositoryError>;

    /// Only the `username` column, ordered by id.
    async fn usernames(&self) -> Result<Vec<Username>, RepositoryError>;

    /// Insert the user and an empty profile in one transaction.
    ///
    /// Fails with [`RepositoryError::Conflict`] if the username is taken.
    async fn create_with_profile(&self, user: NewUser) -> Result<(User, Profile), RepositoryError>;

    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError>;

    /// Replace the avatar, creating the profile if it is missing.
    async fn set_avatar(&self, user_id: UserId, avatar: &str) -> Result<Profile, RepositoryError>;

    /// Direct permissions plus the permissions of every group of the user.
    async fn permissions(&self, user_id: UserId) -> Result<BTreeSet<String>, RepositoryError>;

    /// Grant a permission directly, creating the codename if needed.
    async fn grant_permission(&self, user_id: UserId, codename: &str) -> Result<(), RepositoryError>;

    /// Get or create a group by name.
    async fn ensure_group(&self, name: &str) -> Result<GroupId, RepositoryError>;

    async fn grant_group_permission(
        &self,
        group_id: GroupId,
        codename: &str,
    ) -> Result<(), RepositoryError>;

    async fn add_to_group(&self, user_id: UserId, group_id: GroupId) -> Result<(), RepositoryError>;
}

/// The repository set handed to [`crate::state::AppState`].
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub articles: Arc<dyn ArticleRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    /// sqlx-backed repositories sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            products: Arc::new(PgProductRepository::new(pool.clone())),
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            articles: Arc::new(PgArticleRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool.clone())),
        }
    }

    /// Repositories backed by one shared in-memory database.
    #[must_use]
    pub fn in_memory(db: &Arc<MemoryDatabase>) -> Self {
        Self {
            products: db.clone(),
            orders: db.clone(),
            articles: db.clone(),
            users: db.clone(),
        }
    }
}
