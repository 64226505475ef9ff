//! Authorization checks run before a handler body.
//!
//! A handler lists its [`Check`]s in order; [`authorize`] stops at the first
//! failure. A missing session user fails every check with a login redirect
//! (or 401 under `/api/`), any later failure is a 403.

use std::collections::BTreeSet;

use mysite_core::UserId;

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::state::AppState;

/// Permission codenames checked by the handlers.
pub mod perms {
    pub const ADD_PRODUCT: &str = "shop.add_product";
    pub const CHANGE_PRODUCT: &str = "shop.change_product";
    pub const DELETE_PRODUCT: &str = "shop.delete_product";
    pub const ADD_ORDER: &str = "shop.add_order";
    pub const CHANGE_ORDER: &str = "shop.change_order";
    pub const DELETE_ORDER: &str = "shop.delete_order";
    pub const VIEW_PROFILE: &str = "auth.view_profile";

    /// Every codename seeded by the migrations.
    pub const ALL: &[&str] = &[
        ADD_PRODUCT,
        CHANGE_PRODUCT,
        DELETE_PRODUCT,
        ADD_ORDER,
        CHANGE_ORDER,
        DELETE_ORDER,
        VIEW_PROFILE,
    ];
}

/// A single precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Authenticated,
    Staff,
    Superuser,
    /// Held directly, through a group, or implied by superuser.
    Permission(&'static str),
    /// The user is the recorded creator. `None` never matches.
    Owner(Option<UserId>),
}

/// Run `checks` in order against the session user.
///
/// Permissions are loaded from the repository once, on the first
/// [`Check::Permission`] that needs them.
///
/// # Errors
///
/// [`AppError::LoginRequired`] (or [`AppError::Unauthorized`] for API paths)
/// without a user, [`AppError::Forbidden`] for the first failing check.
pub async fn authorize(
    state: &AppState,
    user: Option<&CurrentUser>,
    checks: &[Check],
    path: &str,
) -> Result<CurrentUser, AppError> {
    let Some(user) = user else {
        if path.starts_with("/api/") {
            return Err(AppError::Unauthorized(
                "Authentication credentials were not provided.".to_string(),
            ));
        }
        return Err(AppError::LoginRequired {
            next: path.to_owned(),
        });
    };

    let mut granted: Option<BTreeSet<String>> = None;
    for check in checks {
        let passed = match check {
            Check::Authenticated => true,
            Check::Staff => user.is_staff,
            Check::Superuser => user.is_superuser,
            Check::Permission(codename) => {
                if user.is_superuser {
                    true
                } else {
                    if granted.is_none() {
                        granted = Some(state.repos().users.permissions(user.id).await?);
                    }
                    granted.as_ref().is_some_and(|set| set.contains(*codename))
                }
            }
            Check::Owner(owner) => *owner == Some(user.id),
        };

        if !passed {
            tracing::info!(user_id = %user.id, check = ?check, path, "authorization denied");
            return Err(AppError::Forbidden(
                "You do not have permission to perform this action.".to_string(),
            ));
        }
    }

    Ok(user.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::cache::NoopCache;
    use crate::config::WebConfig;
    use crate::db::{MemoryDatabase, Repositories};
    use crate::services::auth::AuthService;

    fn state(db: &std::sync::Arc<MemoryDatabase>) -> AppState {
        let config = WebConfig::with_defaults(
            SecretString::from("memory:"),
            SecretString::from("k".repeat(32)),
        );
        AppState::new(
            config,
            Repositories::in_memory(db),
            std::sync::Arc::new(NoopCache),
            None,
        )
    }

    async fn user(db: &MemoryDatabase, name: &str, staff: bool, superuser: bool) -> CurrentUser {
        let (user, _) = AuthService::new(db)
            .create_user(name, "pa55word!", staff, superuser)
            .await
            .unwrap();
        CurrentUser::from(&user)
    }

    #[tokio::test]
    async fn test_anonymous_redirects_or_401() {
        let db = MemoryDatabase::shared();
        let state = state(&db);

        let err = authorize(&state, None, &[Check::Authenticated], "/orders/")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LoginRequired { ref next } if next == "/orders/"));

        let err = authorize(&state, None, &[], "/api/products/")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_permission_direct_group_and_superuser() {
        let db = MemoryDatabase::shared();
        let state = state(&db);
        let plain = user(&db, "plain", false, false).await;
        let grouped = user(&db, "grouped", false, false).await;
        let root = user(&db, "root", true, true).await;

        let check = [Check::Permission(perms::ADD_PRODUCT)];
        assert!(matches!(
            authorize(&state, Some(&plain), &check, "/products/create/").await,
            Err(AppError::Forbidden(_))
        ));

        let repo = &state.repos().users;
        let group = repo.ensure_group("editors").await.unwrap();
        repo.grant_group_permission(group, perms::ADD_PRODUCT).await.unwrap();
        repo.add_to_group(grouped.id, group).await.unwrap();
        assert!(authorize(&state, Some(&grouped), &check, "/").await.is_ok());

        repo.grant_permission(plain.id, perms::ADD_PRODUCT).await.unwrap();
        assert!(authorize(&state, Some(&plain), &check, "/").await.is_ok());

        assert!(authorize(&state, Some(&root), &check, "/").await.is_ok());
    }

    #[tokio::test]
    async fn test_owner_staff_superuser() {
        let db = MemoryDatabase::shared();
        let state = state(&db);
        let alice = user(&db, "alice", false, false).await;
        let staff = user(&db, "staff", true, false).await;

        assert!(authorize(&state, Some(&alice), &[Check::Owner(Some(alice.id))], "/").await.is_ok());
        assert!(authorize(&state, Some(&staff), &[Check::Owner(Some(alice.id))], "/").await.is_err());
        assert!(authorize(&state, Some(&alice), &[Check::Owner(None)], "/").await.is_err());

        assert!(authorize(&state, Some(&staff), &[Check::Staff], "/").await.is_ok());
        assert!(authorize(&state, Some(&alice), &[Check::Staff], "/").await.is_err());
        assert!(authorize(&state, Some(&staff), &[Check::Superuser], "/").await.is_err());
    }
}
