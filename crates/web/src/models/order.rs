//! Shop order types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use mysite_core::{OrderId, Price, ProductId, UserId, Username};

/// Maximum length of a promocode.
pub const PROMOCODE_MAX_LENGTH: usize = 20;

/// An order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub delivery_address: String,
    pub promocode: String,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
}

/// The owner of an order, loaded with the `with_user` join hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUser {
    pub id: UserId,
    pub username: Username,
}

/// A product linked to an order, loaded with the `with_products` join hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderProduct {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
}

/// An order together with whatever relations the query asked for.
///
/// `user` is `None` and `products` is empty when the matching join hint was
/// not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order: Order,
    pub user: Option<OrderUser>,
    pub products: Vec<OrderProduct>,
}

impl OrderDetails {
    /// Ids of the linked products, in link order.
    #[must_use]
    pub fn product_ids(&self) -> Vec<ProductId> {
        self.products.iter().map(|p| p.id).collect()
    }
}

/// Writable order fields. Saving replaces the product links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFields {
    pub delivery_address: String,
    pub promocode: String,
    pub user_id: UserId,
    pub products: Vec<ProductId>,
}

/// Per-order aggregates computed at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTotals {
    pub id: OrderId,
    pub product_count: i64,
    pub total: Decimal,
}
