//! Product repository backed by `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;

use mysite_core::{Discount, Price, ProductId, ProductImageId, UserId};

use super::query::{ProductQuery, like_pattern};
use super::{ProductRepository, RepositoryError, map_write_error};
use crate::models::{NewProduct, Product, ProductFields, ProductImage};

const PRODUCT_COLUMNS: &str = "id, name, description, price, discount, created_at, archived, created_by_id, preview";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Price,
    discount: Discount,
    created_at: DateTime<Utc>,
    archived: bool,
    created_by_id: Option<UserId>,
    preview: Option<String>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            discount: row.discount,
            created_at: row.created_at,
            archived: row.archived,
            created_by: row.created_by_id,
            preview: row.preview,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProductImageRow {
    id: ProductImageId,
    product_id: ProductId,
    image: String,
    description: String,
}

impl From<ProductImageRow> for ProductImage {
    fn from(row: ProductImageRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            image: row.image,
            description: row.description,
        }
    }
}

/// Append the `WHERE` clause for a product query.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    qb.push(" WHERE TRUE");
    if let Some(name) = &query.name {
        qb.push(" AND name = ").push_bind(name.clone());
    }
    if let Some(description) = &query.description {
        qb.push(" AND description = ").push_bind(description.clone());
    }
    if let Some(price) = query.price {
        qb.push(" AND price = ").push_bind(price);
    }
    if let Some(discount) = query.discount {
        qb.push(" AND discount = ").push_bind(discount);
    }
    if let Some(archived) = query.archived {
        qb.push(" AND archived = ").push_bind(archived);
    }
    if let Some(term) = &query.search {
        let pattern = like_pattern(term);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_ordering(qb: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    qb.push(" ORDER BY ");
    for key in &query.ordering {
        qb.push(key.field.column())
            .push(if key.descending { " DESC, " } else { " ASC, " });
    }
    qb.push("id ASC");
}

/// Insert one product inside an open transaction or on the pool.
async fn insert_product<'e, E>(executor: E, product: &NewProduct) -> Result<Product, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let fields = &product.fields;
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "INSERT INTO shop_product (name, description, price, discount, archived, preview, created_by_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(&fields.name)
    .bind(&fields.description)
    .bind(fields.price)
    .bind(fields.discount)
    .bind(fields.archived)
    .bind(&fields.preview)
    .bind(product.created_by)
    .fetch_one(executor)
    .await
    .map_err(|e| map_write_error(e, "product"))?;

    Ok(row.into())
}

/// sqlx implementation of [`ProductRepository`].
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    #[instrument(skip(self))]
    async fn list(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError> {
        let mut qb = QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM shop_product"));
        push_filters(&mut qb, query);
        push_ordering(&mut qb, query);
        if let Some(page) = query.page {
            qb.push(" LIMIT ")
                .push_bind(page.limit())
                .push(" OFFSET ")
                .push_bind(page.offset());
        }

        let rows = qb
            .build_query_as::<ProductRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    #[instrument(skip(self))]
    async fn count(&self, query: &ProductQuery) -> Result<u64, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM shop_product");
        push_filters(&mut qb, query);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative count {count}")))
    }

    #[instrument(skip(self))]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM shop_product WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    #[instrument(skip(self))]
    async fn get_with_images(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<ProductImage>)>, RepositoryError> {
        let Some(product) = self.get(id).await? else {
            return Ok(None);
        };

        let images = sqlx::query_as::<_, ProductImageRow>(
            r"
            SELECT id, product_id, image, description
            FROM shop_product_image
            WHERE product_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some((
            product,
            images.into_iter().map(ProductImage::from).collect(),
        )))
    }

    #[instrument(skip(self, product), fields(name = %product.fields.name))]
    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        insert_product(&self.pool, &product).await
    }

    #[instrument(skip(self, products), fields(count = products.len()))]
    async fn create_many(&self, products: Vec<NewProduct>) -> Result<Vec<Product>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(products.len());
        for product in &products {
            created.push(insert_product(&mut *tx, product).await?);
        }
        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self,
        id: ProductId,
        fields: &ProductFields,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE shop_product
             SET name = $2, description = $3, price = $4, discount = $5, archived = $6, preview = $7
             WHERE id = $1
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.description)
        .bind(fields.price)
        .bind(fields.discount)
        .bind(fields.archived)
        .bind(&fields.preview)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    #[instrument(skip(self))]
    async fn archive(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE shop_product SET archived = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM shop_product WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn add_image(
        &self,
        id: ProductId,
        image: &str,
        description: &str,
    ) -> Result<ProductImage, RepositoryError> {
        let row = sqlx::query_as::<_, ProductImageRow>(
            r"
            INSERT INTO shop_product_image (product_id, image, description)
            VALUES ($1, $2, $3)
            RETURNING id, product_id, image, description
            ",
        )
        .bind(id)
        .bind(image)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "product image"))?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn set_discount_where_name_contains(
        &self,
        needle: &str,
        discount: Discount,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE shop_product SET discount = $1 WHERE name LIKE $2")
            .bind(discount)
            .bind(like_pattern(needle))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
