//! Order repository backed by `PostgreSQL`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::instrument;

use mysite_core::{OrderId, Price, ProductId, UserId, Username};

use super::query::{OrderQuery, like_pattern};
use super::{OrderRepository, RepositoryError, map_write_error};
use crate::models::{Order, OrderDetails, OrderFields, OrderProduct, OrderTotals, OrderUser};

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    delivery_address: String,
    promocode: String,
    created_at: DateTime<Utc>,
    user_id: UserId,
    username: Option<Username>,
}

impl OrderRow {
    fn into_details(self) -> OrderDetails {
        let user = self.username.map(|username| OrderUser {
            id: self.user_id,
            username,
        });
        OrderDetails {
            order: Order {
                id: self.id,
                delivery_address: self.delivery_address,
                promocode: self.promocode,
                created_at: self.created_at,
                user_id: self.user_id,
            },
            user,
            products: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkedProductRow {
    order_id: OrderId,
    id: ProductId,
    name: String,
    price: Price,
}

#[derive(sqlx::FromRow)]
struct TotalsRow {
    id: OrderId,
    product_count: i64,
    total: Decimal,
}

fn select_head(with_user: bool) -> &'static str {
    if with_user {
        "SELECT o.id, o.delivery_address, o.promocode, o.created_at, o.user_id, u.username
         FROM shop_order o JOIN auth_user u ON u.id = o.user_id"
    } else {
        "SELECT o.id, o.delivery_address, o.promocode, o.created_at, o.user_id, NULL::varchar AS username
         FROM shop_order o"
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
    qb.push(" WHERE TRUE");
    if let Some(address) = &query.delivery_address {
        qb.push(" AND o.delivery_address = ").push_bind(address.clone());
    }
    if let Some(promocode) = &query.promocode {
        qb.push(" AND o.promocode = ").push_bind(promocode.clone());
    }
    if let Some(created_at) = query.created_at {
        qb.push(" AND o.created_at = ").push_bind(created_at);
    }
    if let Some(user) = query.user {
        qb.push(" AND o.user_id = ").push_bind(user);
    }
    if let Some(product) = query.product {
        qb.push(
            " AND EXISTS (SELECT 1 FROM shop_order_products op WHERE op.order_id = o.id AND op.product_id = ",
        )
        .push_bind(product)
        .push(")");
    }
    if let Some(term) = &query.search {
        qb.push(" AND o.delivery_address ILIKE ")
            .push_bind(like_pattern(term));
    }
}

/// Fill `products` for every order (the `with_products` join hint).
async fn attach_products(
    conn: &mut PgConnection,
    orders: &mut [OrderDetails],
) -> Result<(), RepositoryError> {
    if orders.is_empty() {
        return Ok(());
    }
    let ids: Vec<OrderId> = orders.iter().map(|o| o.order.id).collect();
    let rows = sqlx::query_as::<_, LinkedProductRow>(
        r"
        SELECT op.order_id, p.id, p.name, p.price
        FROM shop_order_products op
        JOIN shop_product p ON p.id = op.product_id
        WHERE op.order_id = ANY($1)
        ORDER BY op.id
        ",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_order: HashMap<OrderId, Vec<OrderProduct>> = HashMap::new();
    for row in rows {
        by_order.entry(row.order_id).or_default().push(OrderProduct {
            id: row.id,
            name: row.name,
            price: row.price,
        });
    }
    for details in orders.iter_mut() {
        details.products = by_order.remove(&details.order.id).unwrap_or_default();
    }
    Ok(())
}

async fn fetch_details(
    conn: &mut PgConnection,
    id: OrderId,
) -> Result<Option<OrderDetails>, RepositoryError> {
    let mut qb = QueryBuilder::new(select_head(true));
    qb.push(" WHERE o.id = ").push_bind(id);
    let Some(row) = qb
        .build_query_as::<OrderRow>()
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let mut details = [row.into_details()];
    attach_products(conn, &mut details).await?;
    let [details] = details;
    Ok(Some(details))
}

/// Replace the product links of an order, keeping the given order.
async fn replace_links(
    conn: &mut PgConnection,
    order_id: OrderId,
    products: &[ProductId],
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM shop_order_products WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

    for product in products {
        sqlx::query(
            r"
            INSERT INTO shop_order_products (order_id, product_id)
            VALUES ($1, $2)
            ON CONFLICT (order_id, product_id) DO NOTHING
            ",
        )
        .bind(order_id)
        .bind(product)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_write_error(e, "order product"))?;
    }
    Ok(())
}

async fn insert_order(
    conn: &mut PgConnection,
    fields: &OrderFields,
) -> Result<OrderDetails, RepositoryError> {
    let id: OrderId = sqlx::query_scalar(
        r"
        INSERT INTO shop_order (delivery_address, promocode, user_id)
        VALUES ($1, $2, $3)
        RETURNING id
        ",
    )
    .bind(&fields.delivery_address)
    .bind(&fields.promocode)
    .bind(fields.user_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_write_error(e, "order"))?;

    replace_links(conn, id, &fields.products).await?;
    fetch_details(conn, id).await?.ok_or(RepositoryError::NotFound)
}

/// sqlx implementation of [`OrderRepository`].
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    #[instrument(skip(self))]
    async fn list(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;

        let mut qb = QueryBuilder::new(select_head(query.with_user));
        push_filters(&mut qb, query);
        qb.push(" ORDER BY ");
        for key in &query.ordering {
            qb.push(key.field.column())
                .push(if key.descending { " DESC, " } else { " ASC, " });
        }
        qb.push("o.id ASC");
        if let Some(page) = query.page {
            qb.push(" LIMIT ")
                .push_bind(page.limit())
                .push(" OFFSET ")
                .push_bind(page.offset());
        }

        let rows = qb
            .build_query_as::<OrderRow>()
            .fetch_all(&mut *conn)
            .await?;
        let mut orders: Vec<OrderDetails> = rows.into_iter().map(OrderRow::into_details).collect();
        if query.with_products {
            attach_products(&mut conn, &mut orders).await?;
        }
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn count(&self, query: &OrderQuery) -> Result<u64, RepositoryError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM shop_order o");
        push_filters(&mut qb, query);

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative count {count}")))
    }

    #[instrument(skip(self))]
    async fn get(&self, id: OrderId) -> Result<Option<OrderDetails>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_details(&mut conn, id).await
    }

    #[instrument(skip(self, fields), fields(user_id = %fields.user_id))]
    async fn create(&self, fields: &OrderFields) -> Result<OrderDetails, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let details = insert_order(&mut tx, fields).await?;
        tx.commit().await?;
        Ok(details)
    }

    #[instrument(skip(self, orders), fields(count = orders.len()))]
    async fn create_many(
        &self,
        orders: Vec<OrderFields>,
    ) -> Result<Vec<OrderDetails>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(orders.len());
        for fields in &orders {
            created.push(insert_order(&mut tx, fields).await?);
        }
        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self,
        id: OrderId,
        fields: &OrderFields,
    ) -> Result<Option<OrderDetails>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r"
            UPDATE shop_order
            SET delivery_address = $2, promocode = $3, user_id = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(&fields.delivery_address)
        .bind(&fields.promocode)
        .bind(fields.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "order"))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        replace_links(&mut tx, id, &fields.products).await?;
        let details = fetch_details(&mut tx, id).await?;
        tx.commit().await?;
        Ok(details)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM shop_order WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn get_or_create_with_active_products(
        &self,
        username: &Username,
        delivery_address: &str,
        promocode: &str,
    ) -> Result<(OrderDetails, bool), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let user_id: UserId = sqlx::query_scalar("SELECT id FROM auth_user WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let existing: Option<OrderId> = sqlx::query_scalar(
            r"
            SELECT id FROM shop_order
            WHERE user_id = $1 AND delivery_address = $2 AND promocode = $3
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            ",
        )
        .bind(user_id)
        .bind(delivery_address)
        .bind(promocode)
        .fetch_optional(&mut *tx)
        .await?;

        let (order_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let id: OrderId = sqlx::query_scalar(
                    r"
                    INSERT INTO shop_order (delivery_address, promocode, user_id)
                    VALUES ($1, $2, $3)
                    RETURNING id
                    ",
                )
                .bind(delivery_address)
                .bind(promocode)
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
                (id, true)
            }
        };

        sqlx::query(
            r"
            INSERT INTO shop_order_products (order_id, product_id)
            SELECT $1, p.id FROM shop_product p
            WHERE NOT p.archived
            ORDER BY p.id
            ON CONFLICT (order_id, product_id) DO NOTHING
            ",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        let details = fetch_details(&mut tx, order_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        tx.commit().await?;
        Ok((details, created))
    }

    #[instrument(skip(self))]
    async fn totals(&self) -> Result<Vec<OrderTotals>, RepositoryError> {
        let rows = sqlx::query_as::<_, TotalsRow>(
            r"
            SELECT o.id,
                   COUNT(p.id) AS product_count,
                   COALESCE(SUM(p.price), 0) AS total
            FROM shop_order o
            LEFT JOIN shop_order_products op ON op.order_id = o.id
            LEFT JOIN shop_product p ON p.id = op.product_id
            GROUP BY o.id
            ORDER BY o.id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderTotals {
                id: row.id,
                product_count: row.product_count,
                total: row.total,
            })
            .collect())
    }
}
