//! ORM demo commands: aggregation, bulk update, get-or-create in a
//! transaction and single-column selection.

use std::io::Write;

use mysite_core::{Discount, Username};
use mysite_web::db::{Repositories, RepositoryError};

use super::CommandError;

/// Products whose name contains this get the bulk discount.
const BULK_NAME_NEEDLE: &str = "Smartphone";
const BULK_DISCOUNT: i16 = 11;

const DEMO_ORDER_USER: &str = "steef";
const DEMO_ORDER_ADDRESS: &str = "Kazino777, azino 18";
const DEMO_ORDER_PROMOCODE: &str = "promo5";

fn banner(out: &mut impl Write, title: &str) -> std::io::Result<()> {
    let rule = title.len() + 1;
    writeln!(out, "{}", "_".repeat(rule))?;
    writeln!(out, "{title}")?;
    writeln!(out, "{}", "-".repeat(rule))
}

fn done(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "____")?;
    writeln!(out, "Done")?;
    writeln!(out, "----")
}

/// Print `Order #<id> with <n> products worth <total>` for every order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn agg(repos: &Repositories, out: &mut impl Write) -> Result<(), CommandError> {
    banner(out, " Start demo aggregate !!!")?;

    for totals in repos.orders.totals().await? {
        writeln!(
            out,
            "Order #{} with {} products worth {}",
            totals.id, totals.product_count, totals.total
        )?;
    }

    done(out)?;
    Ok(())
}

/// Set the bulk discount on every matching product and print how many
/// rows changed.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn bulk_actions(repos: &Repositories, out: &mut impl Write) -> Result<(), CommandError> {
    banner(out, "Start demo bulk actions!!!")?;

    let discount = Discount::try_from(BULK_DISCOUNT)
        .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;
    let changed = repos
        .products
        .set_discount_where_name_contains(BULK_NAME_NEEDLE, discount)
        .await?;
    tracing::info!(changed, "Bulk discount applied");
    writeln!(out, "{changed}")?;

    done(out)?;
    Ok(())
}

/// Get or create the demo order of `steef` and attach every non-archived
/// product, all in one transaction. Running it again reuses the order.
///
/// # Errors
///
/// Returns `CommandError::UnknownUser` if `steef` does not exist.
pub async fn create_order(repos: &Repositories, out: &mut impl Write) -> Result<(), CommandError> {
    writeln!(out, "Create order")?;

    let username = Username::parse(DEMO_ORDER_USER)
        .map_err(|_| CommandError::UnknownUser(DEMO_ORDER_USER.to_owned()))?;
    let (details, created) = repos
        .orders
        .get_or_create_with_active_products(&username, DEMO_ORDER_ADDRESS, DEMO_ORDER_PROMOCODE)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => CommandError::UnknownUser(DEMO_ORDER_USER.to_owned()),
            other => other.into(),
        })?;

    tracing::info!(order_id = %details.order.id, created, "Demo order ready");
    writeln!(
        out,
        "Created order #{} for {} with {} products",
        details.order.id,
        username,
        details.products.len()
    )?;
    Ok(())
}

/// Print the usernames as one list, then one per line.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn selecting_fields(
    repos: &Repositories,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    banner(out, "Start demo select fields!!!")?;

    let usernames = repos.users.usernames().await?;
    let quoted: Vec<String> = usernames.iter().map(|u| format!("'{u}'")).collect();
    writeln!(out, "[{}]", quoted.join(", "))?;
    for username in &usernames {
        writeln!(out, "{username}")?;
    }

    done(out)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mysite_core::{Price, UserId};
    use mysite_web::db::{MemoryDatabase, OrderQuery};
    use mysite_web::models::{NewProduct, NewUser, ProductFields};

    async fn seed() -> Repositories {
        let repos = Repositories::in_memory(&MemoryDatabase::shared());
        repos
            .users
            .create_with_profile(NewUser {
                username: Username::parse("steef").unwrap(),
                password_hash: "x".to_owned(),
                is_staff: false,
                is_superuser: false,
            })
            .await
            .unwrap();

        for (name, price, archived) in [
            ("Smartphone 1", "199.00", false),
            ("Smartphone 2", "299.50", false),
            ("Laptop", "1000.00", true),
        ] {
            repos
                .products
                .create(NewProduct {
                    fields: ProductFields {
                        name: name.to_owned(),
                        price: Price::parse(price).unwrap(),
                        archived,
                        ..ProductFields::default()
                    },
                    created_by: Some(UserId::new(1)),
                })
                .await
                .unwrap();
        }
        repos
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_create_order_is_idempotent() {
        let repos = seed().await;

        let mut first = Vec::new();
        create_order(&repos, &mut first).await.unwrap();
        let mut second = Vec::new();
        create_order(&repos, &mut second).await.unwrap();

        let orders = repos.orders.list(&OrderQuery::detailed()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].products.len(), 2);
        assert_eq!(orders[0].order.promocode, "promo5");
        assert_eq!(text(first), text(second));
    }

    #[tokio::test]
    async fn test_create_order_without_demo_user() {
        let repos = Repositories::in_memory(&MemoryDatabase::shared());
        let mut out = Vec::new();

        let err = create_order(&repos, &mut out).await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownUser(_)));
    }

    #[tokio::test]
    async fn test_agg_reports_totals() {
        let repos = seed().await;
        create_order(&repos, &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        agg(&repos, &mut out).await.unwrap();
        let out = text(out);
        assert!(out.contains("Start demo aggregate !!!"));
        assert!(out.contains("Order #1 with 2 products worth 498.50"));
        assert!(out.trim_end().ends_with("----"));
    }

    #[tokio::test]
    async fn test_bulk_actions_counts_matches() {
        let repos = seed().await;

        let mut out = Vec::new();
        bulk_actions(&repos, &mut out).await.unwrap();
        assert!(text(out).lines().any(|line| line == "2"));

        let discounted = repos
            .products
            .get(mysite_core::ProductId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(discounted.discount.percent(), 11);
    }

    #[tokio::test]
    async fn test_selecting_fields_prints_list_then_lines() {
        let repos = seed().await;

        let mut out = Vec::new();
        selecting_fields(&repos, &mut out).await.unwrap();
        let out = text(out);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[3], "['steef']");
        assert_eq!(lines[4], "steef");
    }
}
