//! Typed HTML form bodies and their validation.
//!
//! Each form deserializes from `application/x-www-form-urlencoded` with every
//! field as text, then `validate()` turns it into domain fields or a
//! [`FormErrors`] map keyed by field name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mysite_core::{Discount, Price, ProductId, UserId};

use crate::models::order::PROMOCODE_MAX_LENGTH;
use crate::models::product::NAME_MAX_LENGTH;
use crate::models::{OrderDetails, OrderFields, Product, ProductFields};

const REQUIRED: &str = "This field is required.";

/// Field name to error messages. `__all__` holds errors not tied to a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub const NON_FIELD: &'static str = "__all__";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors with a single message on one field.
    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages for `field`, empty if it has none.
    #[must_use]
    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map_or(&[], Vec::as_slice)
    }

    /// `(field, messages)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Prefix every field with `row N: `, for CSV imports.
    #[must_use]
    pub fn for_row(self, row: usize) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(field, messages)| (format!("row {row}: {field}"), messages))
                .collect(),
        )
    }

    pub fn merge(&mut self, other: Self) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    /// `Ok(value)` if no error was recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` when any error was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

/// Raw product fields as entered. Shared by the HTML form, the JSON API and
/// CSV import.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub discount: String,
    /// Relative media path, kept as entered.
    #[serde(default)]
    pub preview: String,
    /// Checkbox: present means archived.
    #[serde(default)]
    pub archived: Option<String>,
}

impl ProductForm {
    /// Prefill from an existing product, for the update page.
    #[must_use]
    pub fn from_product(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price.to_string(),
            discount: product.discount.to_string(),
            preview: product.preview.clone().unwrap_or_default(),
            archived: product.archived.then(|| "on".to_owned()),
        }
    }

    /// Validate into writable product fields.
    ///
    /// # Errors
    ///
    /// Returns every field error found.
    pub fn validate(&self) -> Result<ProductFields, FormErrors> {
        let mut errors = FormErrors::new();

        let name = validate_name(&self.name, &mut errors);

        let price = if self.price.trim().is_empty() {
            errors.add("price", REQUIRED);
            Price::ZERO
        } else {
            Price::parse(&self.price).unwrap_or_else(|e| {
                errors.add("price", e.to_string());
                Price::ZERO
            })
        };

        let discount = Discount::parse(&self.discount).unwrap_or_else(|e| {
            errors.add("discount", e.to_string());
            Discount::NONE
        });

        let preview = Some(self.preview.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_owned);

        errors.into_result(ProductFields {
            name,
            description: self.description.clone(),
            price,
            discount,
            archived: self.archived.is_some(),
            preview,
        })
    }
}

fn validate_name(raw: &str, errors: &mut FormErrors) -> String {
    let name = raw.trim();
    if name.is_empty() {
        errors.add("name", REQUIRED);
    } else if name.chars().count() > NAME_MAX_LENGTH {
        errors.add(
            "name",
            format!("Ensure this value has at most {NAME_MAX_LENGTH} characters."),
        );
    }
    name.to_owned()
}

/// Raw order fields. `products` is a comma separated list of product ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderForm {
    #[serde(default)]
    pub delivery_address: String,
    #[serde(default)]
    pub promocode: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub products: String,
}

impl OrderForm {
    /// Prefill from an existing order.
    #[must_use]
    pub fn from_order(details: &OrderDetails) -> Self {
        Self {
            delivery_address: details.order.delivery_address.clone(),
            promocode: details.order.promocode.clone(),
            user: details.order.user_id.to_string(),
            products: join_ids(&details.product_ids()),
        }
    }

    /// Validate into writable order fields.
    ///
    /// Only the shape is checked here; unknown user or product ids are
    /// reported by the repository as a conflict.
    ///
    /// # Errors
    ///
    /// Returns every field error found.
    pub fn validate(&self) -> Result<OrderFields, FormErrors> {
        let mut errors = FormErrors::new();

        let promocode = self.promocode.trim();
        if promocode.chars().count() > PROMOCODE_MAX_LENGTH {
            errors.add(
                "promocode",
                format!("Ensure this value has at most {PROMOCODE_MAX_LENGTH} characters."),
            );
        }

        let user_id = if self.user.trim().is_empty() {
            errors.add("user", REQUIRED);
            UserId::new(0)
        } else {
            self.user.parse::<UserId>().unwrap_or_else(|_| {
                errors.add("user", "Select a valid user.");
                UserId::new(0)
            })
        };

        let products = parse_ids(&self.products).unwrap_or_else(|bad| {
            errors.add("products", format!("\"{bad}\" is not a valid product id."));
            Vec::new()
        });

        errors.into_result(OrderFields {
            delivery_address: self.delivery_address.clone(),
            promocode: promocode.to_owned(),
            user_id,
            products,
        })
    }
}

/// Parse `"1, 2,3"` into product ids, skipping empty entries and duplicates.
///
/// # Errors
///
/// Returns the first entry that is not an id.
pub fn parse_ids(raw: &str) -> Result<Vec<ProductId>, String> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part.parse::<ProductId>().map_err(|_| part.to_owned())?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Inverse of [`parse_ids`].
#[must_use]
pub fn join_ids(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
}

/// A `next` target is only followed when it is a local absolute path.
#[must_use]
pub fn safe_next(next: Option<&str>, fallback: &str) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path.to_owned(),
        _ => fallback.to_owned(),
    }
}
