//! In-memory implementation of every repository trait.
//!
//! All tables live behind one mutex, so each call is atomic the same way a
//! Postgres transaction is. Used by the handler tests, the CLI tests and the
//! `MYSITE_DATABASE_URL=memory:` demo mode.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use mysite_core::{
    ArticleId, Discount, GroupId, OrderId, ProductId, ProductImageId, ProfileId, UserId, Username,
};

use super::query::{ArticleQuery, OrderQuery, ProductQuery};
use super::{
    ArticleRepository, OrderRepository, ProductRepository, RepositoryError, UserRepository,
};
use crate::models::{
    Article, NewArticle, NewProduct, NewUser, Order, OrderDetails, OrderFields, OrderProduct,
    OrderTotals, OrderUser, Product, ProductFields, ProductImage, Profile, User,
};

#[derive(Default)]
struct Tables {
    last_id: BTreeMap<&'static str, i32>,
    users: BTreeMap<UserId, (User, String)>,
    profiles: BTreeMap<UserId, Profile>,
    groups: BTreeMap<GroupId, String>,
    user_groups: BTreeSet<(UserId, GroupId)>,
    user_permissions: BTreeSet<(UserId, String)>,
    group_permissions: BTreeSet<(GroupId, String)>,
    products: BTreeMap<ProductId, Product>,
    images: Vec<ProductImage>,
    orders: BTreeMap<OrderId, Order>,
    /// `(order, product)` links in insertion order.
    order_products: Vec<(OrderId, ProductId)>,
    articles: BTreeMap<ArticleId, Article>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i32 {
        let id = self.last_id.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn details(&self, order: &Order) -> OrderDetails {
        let user = self.users.get(&order.user_id).map(|(u, _)| OrderUser {
            id: u.id,
            username: u.username.clone(),
        });
        let products = self
            .order_products
            .iter()
            .filter(|(o, _)| *o == order.id)
            .filter_map(|(_, p)| self.products.get(p))
            .map(|p| OrderProduct {
                id: p.id,
                name: p.name.clone(),
                price: p.price,
            })
            .collect();
        OrderDetails {
            order: order.clone(),
            user,
            products,
        }
    }

    fn check_order_refs(&self, fields: &OrderFields) -> Result<(), RepositoryError> {
        if !self.users.contains_key(&fields.user_id) {
            return Err(RepositoryError::Conflict(
                "order references a missing row".to_owned(),
            ));
        }
        if fields.products.iter().any(|p| !self.products.contains_key(p)) {
            return Err(RepositoryError::Conflict(
                "order product references a missing row".to_owned(),
            ));
        }
        Ok(())
    }

    fn link_products(&mut self, order_id: OrderId, products: &[ProductId]) {
        self.order_products.retain(|(o, _)| *o != order_id);
        for product in products {
            if !self.order_products.contains(&(order_id, *product)) {
                self.order_products.push((order_id, *product));
            }
        }
    }

    fn insert_order(&mut self, fields: &OrderFields) -> OrderDetails {
        let id = OrderId::new(self.next_id("shop_order"));
        let order = Order {
            id,
            delivery_address: fields.delivery_address.clone(),
            promocode: fields.promocode.clone(),
            created_at: Utc::now(),
            user_id: fields.user_id,
        };
        self.orders.insert(id, order.clone());
        self.link_products(id, &fields.products);
        self.details(&order)
    }

    fn insert_product(&mut self, product: NewProduct) -> Product {
        let id = ProductId::new(self.next_id("shop_product"));
        let ProductFields {
            name,
            description,
            price,
            discount,
            archived,
            preview,
        } = product.fields;
        let product = Product {
            id,
            name,
            description,
            price,
            discount,
            created_at: Utc::now(),
            archived,
            created_by: product.created_by,
            preview,
        };
        self.products.insert(id, product.clone());
        product
    }

    fn ensure_profile(&mut self, user_id: UserId) -> &mut Profile {
        let id = match self.profiles.get(&user_id) {
            Some(profile) => profile.id,
            None => ProfileId::new(self.next_id("auth_profile")),
        };
        self.profiles.entry(user_id).or_insert(Profile {
            id,
            user_id,
            avatar: None,
            bio: String::new(),
        })
    }
}

/// Every mysite table, held in process memory.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProductRepository for MemoryDatabase {
    async fn list(&self, query: &ProductQuery) -> Result<Vec<Product>, RepositoryError> {
        let tables = self.lock();
        let mut items: Vec<Product> = tables
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        query.sort(&mut items);
        Ok(match query.page {
            Some(page) => page.slice(items),
            None => items,
        })
    }

    async fn count(&self, query: &ProductQuery) -> Result<u64, RepositoryError> {
        let tables = self.lock();
        let count = tables.products.values().filter(|p| query.matches(p)).count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn get_with_images(
        &self,
        id: ProductId,
    ) -> Result<Option<(Product, Vec<ProductImage>)>, RepositoryError> {
        let tables = self.lock();
        Ok(tables.products.get(&id).map(|product| {
            let images = tables
                .images
                .iter()
                .filter(|i| i.product_id == id)
                .cloned()
                .collect();
            (product.clone(), images)
        }))
    }

    async fn create(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        Ok(self.lock().insert_product(product))
    }

    async fn create_many(&self, products: Vec<NewProduct>) -> Result<Vec<Product>, RepositoryError> {
        let mut tables = self.lock();
        Ok(products
            .into_iter()
            .map(|p| tables.insert_product(p))
            .collect())
    }

    async fn update(
        &self,
        id: ProductId,
        fields: &ProductFields,
    ) -> Result<Option<Product>, RepositoryError> {
        let mut tables = self.lock();
        Ok(tables.products.get_mut(&id).map(|product| {
            product.name.clone_from(&fields.name);
            product.description.clone_from(&fields.description);
            product.price = fields.price;
            product.discount = fields.discount;
            product.archived = fields.archived;
            product.preview.clone_from(&fields.preview);
            product.clone()
        }))
    }

    async fn archive(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        Ok(tables
            .products
            .get_mut(&id)
            .map(|p| p.archived = true)
            .is_some())
    }

    async fn delete(&self, id: ProductId) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        let removed = tables.products.remove(&id).is_some();
        if removed {
            tables.images.retain(|i| i.product_id != id);
            tables.order_products.retain(|(_, p)| *p != id);
        }
        Ok(removed)
    }

    async fn add_image(
        &self,
        id: ProductId,
        image: &str,
        description: &str,
    ) -> Result<ProductImage, RepositoryError> {
        let mut tables = self.lock();
        if !tables.products.contains_key(&id) {
            return Err(RepositoryError::Conflict(
                "product image references a missing row".to_owned(),
            ));
        }
        let image = ProductImage {
            id: ProductImageId::new(tables.next_id("shop_product_image")),
            product_id: id,
            image: image.to_owned(),
            description: description.to_owned(),
        };
        tables.images.push(image.clone());
        Ok(image)
    }

    async fn set_discount_where_name_contains(
        &self,
        needle: &str,
        discount: Discount,
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.lock();
        let mut changed = 0;
        for product in tables.products.values_mut() {
            if product.name.contains(needle) {
                product.discount = discount;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl OrderRepository for MemoryDatabase {
    async fn list(&self, query: &OrderQuery) -> Result<Vec<OrderDetails>, RepositoryError> {
        let tables = self.lock();
        let mut items: Vec<OrderDetails> = tables
            .orders
            .values()
            .map(|o| tables.details(o))
            .filter(|d| query.matches(d))
            .collect();
        query.sort(&mut items);
        let mut items = match query.page {
            Some(page) => page.slice(items),
            None => items,
        };
        for details in &mut items {
            if !query.with_user {
                details.user = None;
            }
            if !query.with_products {
                details.products.clear();
            }
        }
        Ok(items)
    }

    async fn count(&self, query: &OrderQuery) -> Result<u64, RepositoryError> {
        let tables = self.lock();
        let count = tables
            .orders
            .values()
            .filter(|o| query.matches(&tables.details(o)))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderDetails>, RepositoryError> {
        let tables = self.lock();
        Ok(tables.orders.get(&id).map(|o| tables.details(o)))
    }

    async fn create(&self, fields: &OrderFields) -> Result<OrderDetails, RepositoryError> {
        let mut tables = self.lock();
        tables.check_order_refs(fields)?;
        Ok(tables.insert_order(fields))
    }

    async fn create_many(
        &self,
        orders: Vec<OrderFields>,
    ) -> Result<Vec<OrderDetails>, RepositoryError> {
        let mut tables = self.lock();
        for fields in &orders {
            tables.check_order_refs(fields)?;
        }
        Ok(orders.iter().map(|f| tables.insert_order(f)).collect())
    }

    async fn update(
        &self,
        id: OrderId,
        fields: &OrderFields,
    ) -> Result<Option<OrderDetails>, RepositoryError> {
        let mut tables = self.lock();
        tables.check_order_refs(fields)?;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(None);
        };
        order.delivery_address.clone_from(&fields.delivery_address);
        order.promocode.clone_from(&fields.promocode);
        order.user_id = fields.user_id;
        let order = order.clone();
        tables.link_products(id, &fields.products);
        Ok(Some(tables.details(&order)))
    }

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut tables = self.lock();
        let removed = tables.orders.remove(&id).is_some();
        tables.order_products.retain(|(o, _)| *o != id);
        Ok(removed)
    }

    async fn get_or_create_with_active_products(
        &self,
        username: &Username,
        delivery_address: &str,
        promocode: &str,
    ) -> Result<(OrderDetails, bool), RepositoryError> {
        let mut tables = self.lock();
        let user_id = tables
            .users
            .values()
            .find(|(u, _)| &u.username == username)
            .map(|(u, _)| u.id)
            .ok_or(RepositoryError::NotFound)?;

        let existing = tables
            .orders
            .values()
            .find(|o| {
                o.user_id == user_id
                    && o.delivery_address == delivery_address
                    && o.promocode == promocode
            })
            .map(|o| o.id);

        let active: Vec<ProductId> = tables
            .products
            .values()
            .filter(|p| !p.archived)
            .map(|p| p.id)
            .collect();

        let (order_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let fields = OrderFields {
                    delivery_address: delivery_address.to_owned(),
                    promocode: promocode.to_owned(),
                    user_id,
                    products: Vec::new(),
                };
                (tables.insert_order(&fields).order.id, true)
            }
        };
        for product in active {
            if !tables.order_products.contains(&(order_id, product)) {
                tables.order_products.push((order_id, product));
            }
        }

        let order = tables
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        Ok((tables.details(&order), created))
    }

    async fn totals(&self) -> Result<Vec<OrderTotals>, RepositoryError> {
        let tables = self.lock();
        Ok(tables
            .orders
            .values()
            .map(|o| {
                let details = tables.details(o);
                OrderTotals {
                    id: o.id,
                    product_count: i64::try_from(details.products.len()).unwrap_or(i64::MAX),
                    total: details
                        .products
                        .iter()
                        .map(|p| p.price.amount())
                        .sum::<Decimal>(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl ArticleRepository for MemoryDatabase {
    async fn list(&self, query: &ArticleQuery) -> Result<Vec<Article>, RepositoryError> {
        let tables = self.lock();
        let mut items: Vec<Article> = tables
            .articles
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        query.sort(&mut items);
        if let Some(limit) = query.limit {
            items.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(items)
    }

    async fn get(&self, id: ArticleId) -> Result<Option<Article>, RepositoryError> {
        Ok(self.lock().articles.get(&id).cloned())
    }

    async fn create(&self, article: NewArticle) -> Result<Article, RepositoryError> {
        let mut tables = self.lock();
        let article = Article {
            id: ArticleId::new(tables.next_id("blog_article")),
            title: article.title,
            body: article.body,
            published_at: article.published_at,
        };
        tables.articles.insert(article.id, article.clone());
        Ok(article)
    }
}

#[async_trait]
impl UserRepository for MemoryDatabase {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock().users.get(&id).map(|(u, _)| u.clone()))
    }

    async fn get_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|(u, _)| &u.username == username)
            .map(|(u, _)| u.clone()))
    }

    async fn get_credentials(
        &self,
        username: &Username,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|(u, _)| &u.username == username)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self.lock().users.values().map(|(u, _)| u.clone()).collect())
    }

    async fn usernames(&self) -> Result<Vec<Username>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .map(|(u, _)| u.username.clone())
            .collect())
    }

    async fn create_with_profile(&self, user: NewUser) -> Result<(User, Profile), RepositoryError> {
        let mut tables = self.lock();
        if tables.users.values().any(|(u, _)| u.username == user.username) {
            return Err(RepositoryError::Conflict("username already exists".to_owned()));
        }
        let created = User {
            id: UserId::new(tables.next_id("auth_user")),
            username: user.username,
            email: None,
            first_name: String::new(),
            last_name: String::new(),
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            is_active: true,
            date_joined: Utc::now(),
        };
        tables
            .users
            .insert(created.id, (created.clone(), user.password_hash));
        let profile = tables.ensure_profile(created.id).clone();
        Ok((created, profile))
    }

    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        Ok(self.lock().profiles.get(&user_id).cloned())
    }

    async fn set_avatar(&self, user_id: UserId, avatar: &str) -> Result<Profile, RepositoryError> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&user_id) {
            return Err(RepositoryError::Conflict(
                "profile references a missing row".to_owned(),
            ));
        }
        let profile = tables.ensure_profile(user_id);
        profile.avatar = Some(avatar.to_owned());
        Ok(profile.clone())
    }

    async fn permissions(&self, user_id: UserId) -> Result<BTreeSet<String>, RepositoryError> {
        let tables = self.lock();
        let direct = tables
            .user_permissions
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, c)| c.clone());
        let via_groups = tables
            .user_groups
            .iter()
            .filter(|(u, _)| *u == user_id)
            .flat_map(|(_, g)| {
                tables
                    .group_permissions
                    .iter()
                    .filter(move |(pg, _)| pg == g)
                    .map(|(_, c)| c.clone())
            });
        Ok(direct.chain(via_groups).collect())
    }

    async fn grant_permission(&self, user_id: UserId, codename: &str) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&user_id) {
            return Err(RepositoryError::Conflict(
                "user permission references a missing row".to_owned(),
            ));
        }
        tables
            .user_permissions
            .insert((user_id, codename.to_owned()));
        Ok(())
    }

    async fn ensure_group(&self, name: &str) -> Result<GroupId, RepositoryError> {
        let mut tables = self.lock();
        if let Some((id, _)) = tables.groups.iter().find(|(_, n)| n.as_str() == name) {
            return Ok(*id);
        }
        let id = GroupId::new(tables.next_id("auth_group"));
        tables.groups.insert(id, name.to_owned());
        Ok(id)
    }

    async fn grant_group_permission(
        &self,
        group_id: GroupId,
        codename: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        if !tables.groups.contains_key(&group_id) {
            return Err(RepositoryError::Conflict(
                "group permission references a missing row".to_owned(),
            ));
        }
        tables
            .group_permissions
            .insert((group_id, codename.to_owned()));
        Ok(())
    }

    async fn add_to_group(&self, user_id: UserId, group_id: GroupId) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&user_id) || !tables.groups.contains_key(&group_id) {
            return Err(RepositoryError::Conflict(
                "user group references a missing row".to_owned(),
            ));
        }
        tables.user_groups.insert((user_id, group_id));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mysite_core::Price;

    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: Username::parse(name).unwrap(),
            password_hash: "hash".to_owned(),
            is_staff: false,
            is_superuser: false,
        }
    }

    fn new_product(name: &str, price: &str, archived: bool) -> NewProduct {
        NewProduct {
            fields: ProductFields {
                name: name.to_owned(),
                price: Price::parse(price).unwrap(),
                archived,
                ..ProductFields::default()
            },
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_is_conflict() {
        let db = MemoryDatabase::shared();
        db.create_with_profile(new_user("steef")).await.unwrap();
        let err = db.create_with_profile(new_user("steef")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_registration_creates_profile() {
        let db = MemoryDatabase::shared();
        let (user, profile) = db.create_with_profile(new_user("alice")).await.unwrap();
        assert_eq!(profile.user_id, user.id);
        assert_eq!(db.profile(user.id).await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_permissions_include_group_permissions() {
        let db = MemoryDatabase::shared();
        let (user, _) = db.create_with_profile(new_user("bob")).await.unwrap();
        db.grant_permission(user.id, "shop.add_product").await.unwrap();
        let group = db.ensure_group("editors").await.unwrap();
        assert_eq!(db.ensure_group("editors").await.unwrap(), group);
        db.grant_group_permission(group, "shop.change_product")
            .await
            .unwrap();
        db.add_to_group(user.id, group).await.unwrap();

        let perms = db.permissions(user.id).await.unwrap();
        assert!(perms.contains("shop.add_product"));
        assert!(perms.contains("shop.change_product"));
        assert_eq!(perms.len(), 2);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let db = MemoryDatabase::shared();
        db.create_with_profile(new_user("steef")).await.unwrap();
        ProductRepository::create(&*db, new_product("A", "1", false))
            .await
            .unwrap();
        ProductRepository::create(&*db, new_product("B", "2", true))
            .await
            .unwrap();
        let name = Username::parse("steef").unwrap();

        let (first, created) = db
            .get_or_create_with_active_products(&name, "addr", "promo5")
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.products.len(), 1);

        let (second, created) = db
            .get_or_create_with_active_products(&name, "addr", "promo5")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.order.id, first.order.id);
        assert_eq!(second.products.len(), 1);
        assert_eq!(OrderRepository::count(&*db, &OrderQuery::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_requires_user() {
        let db = MemoryDatabase::shared();
        let name = Username::parse("ghost").unwrap();
        let err = db
            .get_or_create_with_active_products(&name, "addr", "promo5")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_order_create_rejects_unknown_product() {
        let db = MemoryDatabase::shared();
        let (user, _) = db.create_with_profile(new_user("carol")).await.unwrap();
        let fields = OrderFields {
            delivery_address: "somewhere".to_owned(),
            promocode: String::new(),
            user_id: user.id,
            products: vec![ProductId::new(99)],
        };
        assert!(matches!(
            OrderRepository::create(&*db, &fields).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_order_join_hints() {
        let db = MemoryDatabase::shared();
        let (user, _) = db.create_with_profile(new_user("dave")).await.unwrap();
        let product = ProductRepository::create(&*db, new_product("Chair", "10", false))
            .await
            .unwrap();
        OrderRepository::create(
            &*db,
            &OrderFields {
                delivery_address: "x".to_owned(),
                promocode: String::new(),
                user_id: user.id,
                products: vec![product.id],
            },
        )
        .await
        .unwrap();

        let bare = OrderRepository::list(&*db, &OrderQuery::default()).await.unwrap();
        assert!(bare[0].user.is_none());
        assert!(bare[0].products.is_empty());

        let full = OrderRepository::list(&*db, &OrderQuery::detailed()).await.unwrap();
        assert_eq!(full[0].user.as_ref().unwrap().id, user.id);
        assert_eq!(full[0].product_ids(), vec![product.id]);

        let by_product = OrderQuery {
            product: Some(ProductId::new(999)),
            ..OrderQuery::default()
        };
        assert!(OrderRepository::list(&*db, &by_product).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_totals_and_bulk_discount() {
        let db = MemoryDatabase::shared();
        let (user, _) = db.create_with_profile(new_user("erin")).await.unwrap();
        let a = ProductRepository::create(&*db, new_product("Smartphone X", "100.50", false))
            .await
            .unwrap();
        let b = ProductRepository::create(&*db, new_product("smartphone case", "9.50", false))
            .await
            .unwrap();
        OrderRepository::create(
            &*db,
            &OrderFields {
                delivery_address: "x".to_owned(),
                promocode: String::new(),
                user_id: user.id,
                products: vec![a.id, b.id],
            },
        )
        .await
        .unwrap();

        let totals = db.totals().await.unwrap();
        assert_eq!(totals[0].product_count, 2);
        assert_eq!(totals[0].total.to_string(), "110.00");

        let changed = db
            .set_discount_where_name_contains("Smartphone", Discount::parse("11").unwrap())
            .await
            .unwrap();
        assert_eq!(changed, 1);
    }
}
