//! User, group and permission management.
//!
//! # Usage
//!
//! ```bash
//! mysite-cli user create -u steef -p 'correct horse' --staff
//! mysite-cli user grant -u steef -P shop.add_product
//! mysite-cli user add-group -u steef -g editors
//! mysite-cli group grant -g editors -P shop.change_product
//! ```

use std::io::Write;

use mysite_core::Username;
use mysite_web::db::Repositories;
use mysite_web::models::User;
use mysite_web::services::auth::AuthService;

use super::CommandError;

async fn find_user(repos: &Repositories, username: &str) -> Result<User, CommandError> {
    let parsed =
        Username::parse(username).map_err(|_| CommandError::UnknownUser(username.to_owned()))?;
    repos
        .users
        .get_by_username(&parsed)
        .await?
        .ok_or_else(|| CommandError::UnknownUser(username.to_owned()))
}

/// Create a user with an empty profile.
///
/// # Errors
///
/// Returns `CommandError::Auth` if the username is malformed or taken, or
/// the password is too weak.
pub async fn create(
    repos: &Repositories,
    out: &mut impl Write,
    username: &str,
    password: &str,
    staff: bool,
    superuser: bool,
) -> Result<(), CommandError> {
    let (user, _) = AuthService::new(repos.users.as_ref())
        .create_user(username, password, staff, superuser)
        .await?;

    tracing::info!(user_id = %user.id, "User created");
    writeln!(out, "Created user {} (id {})", user.username, user.id)?;
    Ok(())
}

/// Grant a permission codename directly to a user.
///
/// # Errors
///
/// Returns `CommandError::UnknownUser` if the user does not exist.
pub async fn grant(
    repos: &Repositories,
    out: &mut impl Write,
    username: &str,
    codename: &str,
) -> Result<(), CommandError> {
    let user = find_user(repos, username).await?;
    repos.users.grant_permission(user.id, codename).await?;

    writeln!(out, "Granted {codename} to {}", user.username)?;
    Ok(())
}

/// Add a user to a group, creating the group if needed.
///
/// # Errors
///
/// Returns `CommandError::UnknownUser` if the user does not exist.
pub async fn add_to_group(
    repos: &Repositories,
    out: &mut impl Write,
    username: &str,
    group: &str,
) -> Result<(), CommandError> {
    let user = find_user(repos, username).await?;
    let group_id = repos.users.ensure_group(group).await?;
    repos.users.add_to_group(user.id, group_id).await?;

    writeln!(out, "Added {} to group {group}", user.username)?;
    Ok(())
}

/// Grant a permission codename to a group, creating the group if needed.
///
/// # Errors
///
/// Returns an error if the database write fails.
pub async fn grant_group(
    repos: &Repositories,
    out: &mut impl Write,
    group: &str,
    codename: &str,
) -> Result<(), CommandError> {
    let group_id = repos.users.ensure_group(group).await?;
    repos.users.grant_group_permission(group_id, codename).await?;

    writeln!(out, "Granted {codename} to group {group}")?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mysite_web::db::MemoryDatabase;

    fn repos() -> Repositories {
        Repositories::in_memory(&MemoryDatabase::shared())
    }

    #[tokio::test]
    async fn test_group_permissions_reach_members() {
        let repos = repos();
        let mut out = Vec::new();

        create(&repos, &mut out, "steef", "long-enough-pw", false, false)
            .await
            .unwrap();
        grant_group(&repos, &mut out, "editors", "shop.change_product")
            .await
            .unwrap();
        add_to_group(&repos, &mut out, "steef", "editors").await.unwrap();
        grant(&repos, &mut out, "steef", "shop.add_product").await.unwrap();

        let user = find_user(&repos, "steef").await.unwrap();
        let perms = repos.users.permissions(user.id).await.unwrap();
        assert!(perms.contains("shop.change_product"));
        assert!(perms.contains("shop.add_product"));

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Created user steef"));
        assert!(text.contains("Added steef to group editors"));
    }

    #[tokio::test]
    async fn test_grant_to_unknown_user_fails() {
        let repos = repos();
        let mut out = Vec::new();

        let err = grant(&repos, &mut out, "ghost", "shop.add_product")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownUser(name) if name == "ghost"));
        assert!(out.is_empty());
    }
}
