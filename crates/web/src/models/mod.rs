//! Domain models.
//!
//! These are validated domain objects, separate from database row types.
//! Row structs live next to the queries in `db`.

pub mod article;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use article::{Article, NewArticle};
pub use order::{Order, OrderDetails, OrderFields, OrderProduct, OrderTotals, OrderUser};
pub use product::{NewProduct, Product, ProductFields, ProductImage};
pub use session::{CurrentUser, keys as session_keys};
pub use user::{NewUser, Profile, User};
