//! Typed query specifications.
//!
//! A query spec lists filters, join hints, ordering and paging for one
//! entity. The Postgres repositories translate a spec into SQL with
//! `sqlx::QueryBuilder`; the in-memory repository evaluates it with the
//! `matches` / `sort` helpers defined here, so both backends agree.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use mysite_core::{Discount, Price, ProductId, UserId};

use crate::models::{Article, OrderDetails, Product};

/// One ordering term: a field and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey<F> {
    pub field: F,
    pub descending: bool,
}

impl<F: Copy> SortKey<F> {
    #[must_use]
    pub const fn asc(field: F) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    #[must_use]
    pub const fn desc(field: F) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Parse a comma separated `ordering` parameter such as `-price,name`.
    ///
    /// Blank terms are skipped. Returns the first term whose field name is
    /// not accepted by `field`.
    ///
    /// # Errors
    ///
    /// Returns the offending field name.
    pub fn parse_list(raw: &str, field: impl Fn(&str) -> Option<F>) -> Result<Vec<Self>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                let (descending, name) = term
                    .strip_prefix('-')
                    .map_or((false, term), |rest| (true, rest));
                field(name)
                    .map(|field| Self { field, descending })
                    .ok_or_else(|| name.to_owned())
            })
            .collect()
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// A 1-based page of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    #[must_use]
    pub const fn offset(&self) -> i64 {
        (self.number.saturating_sub(1) as i64) * (self.size as i64)
    }

    #[must_use]
    pub const fn limit(&self) -> i64 {
        self.size as i64
    }

    /// Slice `items` down to this page.
    #[must_use]
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let size = usize::try_from(self.size).unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(size).collect()
    }
}

/// Case-insensitive substring test used by `search`.
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Escape `%`, `_` and `\` and wrap the term for `ILIKE`.
#[must_use]
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductSortField {
    Id,
    Name,
    Price,
    Discount,
    CreatedAt,
}

impl ProductSortField {
    /// Fields clients may sort the API list by.
    #[must_use]
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "name" => Some(Self::Name),
            "price" => Some(Self::Price),
            "discount" => Some(Self::Discount),
            _ => None,
        }
    }

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Price => "price",
            Self::Discount => "discount",
            Self::CreatedAt => "created_at",
        }
    }

    fn compare(self, a: &Product, b: &Product) -> Ordering {
        match self {
            Self::Id => a.id.cmp(&b.id),
            Self::Name => a.name.cmp(&b.name),
            Self::Price => a.price.cmp(&b.price),
            Self::Discount => a.discount.cmp(&b.discount),
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

/// Product filters. Every `Some` field is an exact match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub discount: Option<Discount>,
    pub archived: Option<bool>,
    /// Case-insensitive substring over name and description.
    pub search: Option<String>,
    /// Empty means by id. Id is always the final tie-breaker.
    pub ordering: Vec<SortKey<ProductSortField>>,
    pub page: Option<Page>,
}

impl ProductQuery {
    /// The shop list: non-archived products by id.
    #[must_use]
    pub fn active() -> Self {
        Self {
            archived: Some(false),
            ..Self::default()
        }
    }

    /// Non-archived products oldest first, for the product feed.
    #[must_use]
    pub fn feed() -> Self {
        Self {
            archived: Some(false),
            ordering: vec![SortKey::asc(ProductSortField::CreatedAt)],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, p: &Product) -> bool {
        self.name.as_ref().is_none_or(|v| &p.name == v)
            && self.description.as_ref().is_none_or(|v| &p.description == v)
            && self.price.is_none_or(|v| p.price == v)
            && self.discount.is_none_or(|v| p.discount == v)
            && self.archived.is_none_or(|v| p.archived == v)
            && self
                .search
                .as_ref()
                .is_none_or(|term| contains_ci(&p.name, term) || contains_ci(&p.description, term))
    }

    pub fn sort(&self, items: &mut [Product]) {
        items.sort_by(|a, b| {
            self.ordering
                .iter()
                .map(|key| key.apply(key.field.compare(a, b)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.id.cmp(&b.id))
        });
    }
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSortField {
    Id,
    User,
    CreatedAt,
}

impl OrderSortField {
    /// Fields clients may sort the API list by.
    #[must_use]
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "user" => Some(Self::User),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Id => "o.id",
            Self::User => "o.user_id",
            Self::CreatedAt => "o.created_at",
        }
    }

    fn compare(self, a: &OrderDetails, b: &OrderDetails) -> Ordering {
        match self {
            Self::Id => a.order.id.cmp(&b.order.id),
            Self::User => a.order.user_id.cmp(&b.order.user_id),
            Self::CreatedAt => a.order.created_at.cmp(&b.order.created_at),
        }
    }
}

/// Order filters and join hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub delivery_address: Option<String>,
    pub promocode: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub user: Option<UserId>,
    /// Orders that contain this product.
    pub product: Option<ProductId>,
    /// Case-insensitive substring over the delivery address.
    pub search: Option<String>,
    pub ordering: Vec<SortKey<OrderSortField>>,
    pub page: Option<Page>,
    /// Load the owning user.
    pub with_user: bool,
    /// Load the linked products.
    pub with_products: bool,
}

impl OrderQuery {
    /// Every order with its user and products, by id.
    #[must_use]
    pub fn detailed() -> Self {
        Self {
            with_user: true,
            with_products: true,
            ..Self::default()
        }
    }

    /// Orders of one user with their products.
    #[must_use]
    pub fn for_user(user: UserId) -> Self {
        Self {
            user: Some(user),
            ..Self::detailed()
        }
    }

    /// `products` here must be loaded when `self.product` is set.
    #[must_use]
    pub fn matches(&self, o: &OrderDetails) -> bool {
        self.delivery_address
            .as_ref()
            .is_none_or(|v| &o.order.delivery_address == v)
            && self.promocode.as_ref().is_none_or(|v| &o.order.promocode == v)
            && self.created_at.is_none_or(|v| o.order.created_at == v)
            && self.user.is_none_or(|v| o.order.user_id == v)
            && self
                .product
                .is_none_or(|v| o.products.iter().any(|p| p.id == v))
            && self
                .search
                .as_ref()
                .is_none_or(|term| contains_ci(&o.order.delivery_address, term))
    }

    pub fn sort(&self, items: &mut [OrderDetails]) {
        items.sort_by(|a, b| {
            self.ordering
                .iter()
                .map(|key| key.apply(key.field.compare(a, b)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.order.id.cmp(&b.order.id))
        });
    }
}

// =============================================================================
// Articles
// =============================================================================

/// Article filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArticleQuery {
    /// Skip drafts.
    pub published_only: bool,
    /// Newest `published_at` first; otherwise by id.
    pub newest_first: bool,
    pub limit: Option<u32>,
}

impl ArticleQuery {
    /// Public list: published articles, newest first.
    #[must_use]
    pub const fn published() -> Self {
        Self {
            published_only: true,
            newest_first: true,
            limit: None,
        }
    }

    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn matches(&self, a: &Article) -> bool {
        !self.published_only || a.is_published()
    }

    pub fn sort(&self, items: &mut [Article]) {
        if self.newest_first {
            items.sort_by(|a, b| {
                b.published_at
                    .cmp(&a.published_at)
                    .then_with(|| b.id.cmp(&a.id))
            });
        } else {
            items.sort_by_key(|a| a.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use mysite_core::{ArticleId, ProductId};

    use super::*;

    fn product(id: i32, name: &str, price: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: name.to_owned(),
            description: String::new(),
            price: Price::parse(price).unwrap(),
            discount: Discount::NONE,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            archived: false,
            created_by: None,
            preview: None,
        }
    }

    #[test]
    fn test_parse_ordering() {
        let keys =
            SortKey::parse_list("-price, name", ProductSortField::from_api_name).unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey::desc(ProductSortField::Price),
                SortKey::asc(ProductSortField::Name)
            ]
        );
    }

    #[test]
    fn test_parse_ordering_rejects_unknown_field() {
        let err = SortKey::parse_list("created_at", ProductSortField::from_api_name).unwrap_err();
        assert_eq!(err, "created_at");
        assert!(SortKey::parse_list("products", OrderSortField::from_api_name).is_err());
    }

    #[test]
    fn test_page_offsets() {
        let page = Page { number: 3, size: 10 };
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);
        assert_eq!(page.slice((0..25).collect()), vec![20, 21, 22, 23, 24]);
        assert!(Page { number: 9, size: 10 }.slice((0..25).collect::<Vec<i32>>()).is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_product_search_is_case_insensitive() {
        let query = ProductQuery {
            search: Some("PHONE".to_owned()),
            ..ProductQuery::default()
        };
        assert!(query.matches(&product(1, "Smartphone", "1")));
        assert!(!query.matches(&product(2, "Laptop", "1")));
    }

    #[test]
    fn test_product_sort_with_id_tiebreak() {
        let query = ProductQuery {
            ordering: vec![SortKey::desc(ProductSortField::Price)],
            ..ProductQuery::default()
        };
        let mut items = vec![
            product(1, "a", "5"),
            product(2, "b", "9"),
            product(3, "c", "5"),
        ];
        query.sort(&mut items);
        let ids: Vec<i32> = items.iter().map(|p| p.id.as_i32()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_active_excludes_archived() {
        let mut archived = product(1, "old", "1");
        archived.archived = true;
        assert!(!ProductQuery::active().matches(&archived));
        assert!(ProductQuery::default().matches(&archived));
    }

    #[test]
    fn test_article_query_skips_drafts_and_sorts_newest_first() {
        let at = |day| Some(Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap());
        let mut items = vec![
            Article { id: ArticleId::new(1), title: "a".into(), body: String::new(), published_at: at(1) },
            Article { id: ArticleId::new(2), title: "b".into(), body: String::new(), published_at: None },
            Article { id: ArticleId::new(3), title: "c".into(), body: String::new(), published_at: at(3) },
        ];
        let query = ArticleQuery::published();
        items.retain(|a| query.matches(a));
        query.sort(&mut items);
        let ids: Vec<i32> = items.iter().map(|a| a.id.as_i32()).collect();
        assert_eq!(ids, vec![3, 1]);
    }
}
