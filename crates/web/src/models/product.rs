//! Shop product types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use mysite_core::{Discount, Price, ProductId, ProductImageId, UserId};

/// Maximum length of a product name.
pub const NAME_MAX_LENGTH: usize = 100;

/// A product in the shop catalogue.
///
/// Archived products are hidden from listings and feeds but can still be
/// fetched by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Price,
    pub discount: Discount,
    pub created_at: DateTime<Utc>,
    pub archived: bool,
    pub created_by: Option<UserId>,
    /// Relative media path of the preview image.
    pub preview: Option<String>,
}

impl Product {
    /// The writable fields of this product, for partial updates.
    #[must_use]
    pub fn fields(&self) -> ProductFields {
        ProductFields {
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            discount: self.discount,
            archived: self.archived,
            preview: self.preview.clone(),
        }
    }
}

/// An extra image attached to a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductImage {
    pub id: ProductImageId,
    pub product_id: ProductId,
    pub image: String,
    pub description: String,
}

/// Writable product fields shared by the form handlers, the API and CSV import.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductFields {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub discount: Discount,
    pub archived: bool,
    pub preview: Option<String>,
}

/// A product about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub fields: ProductFields,
    pub created_by: Option<UserId>,
}
