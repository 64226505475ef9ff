//! JSON export payloads.

use serde::Serialize;

use mysite_core::{OrderId, Price, ProductId, UserId};

use crate::db::{OrderQuery, OrderRepository, ProductQuery, ProductRepository, RepositoryError};
use crate::models::{OrderDetails, Product};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductExportRow {
    pub pk: ProductId,
    pub name: String,
    pub price: Price,
    pub archived: bool,
}

impl From<&Product> for ProductExportRow {
    fn from(p: &Product) -> Self {
        Self {
            pk: p.id,
            name: p.name.clone(),
            price: p.price,
            archived: p.archived,
        }
    }
}

/// `{"products": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductsExport {
    pub products: Vec<ProductExportRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderExportRow {
    pub pk: OrderId,
    pub delivery_address: String,
    pub promocode: String,
    pub user: UserId,
    /// Product names.
    pub products: Vec<String>,
}

impl From<&OrderDetails> for OrderExportRow {
    fn from(d: &OrderDetails) -> Self {
        Self {
            pk: d.order.id,
            delivery_address: d.order.delivery_address.clone(),
            promocode: d.order.promocode.clone(),
            user: d.order.user_id,
            products: d.products.iter().map(|p| p.name.clone()).collect(),
        }
    }
}

/// `{"orders": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdersExport {
    pub orders: Vec<OrderExportRow>,
}

/// Every product, archived included, by id.
///
/// # Errors
///
/// Returns `RepositoryError` if the products cannot be loaded.
pub async fn products(repo: &dyn ProductRepository) -> Result<ProductsExport, RepositoryError> {
    let products = repo.list(&ProductQuery::default()).await?;
    Ok(ProductsExport {
        products: products.iter().map(ProductExportRow::from).collect(),
    })
}

/// Orders matching `query` with their product names, by id.
///
/// # Errors
///
/// Returns `RepositoryError` if the orders cannot be loaded.
pub async fn orders(
    repo: &dyn OrderRepository,
    query: &OrderQuery,
) -> Result<OrdersExport, RepositoryError> {
    let query = OrderQuery {
        with_products: true,
        ..query.clone()
    };
    let orders = repo.list(&query).await?;
    Ok(OrdersExport {
        orders: orders.iter().map(OrderExportRow::from).collect(),
    })
}
