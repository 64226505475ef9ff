//! User and profile domain types.

use chrono::{DateTime, Utc};

use mysite_core::{ProfileId, UserId, Username};

/// A site user.
///
/// The password hash is never loaded into this type; see
/// `UserRepository::get_credentials`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

/// Extra per-user data, created together with the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    pub user_id: UserId,
    /// Relative media path of the avatar image.
    pub avatar: Option<String>,
    pub bio: String,
}

/// A user about to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Username,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}
