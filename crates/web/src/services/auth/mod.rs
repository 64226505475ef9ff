//! Authentication service.
//!
//! Username/password registration and login over a [`UserRepository`].

mod error;

pub use error::AuthError;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use mysite_core::Username;

use crate::db::{RepositoryError, UserRepository};
use crate::models::{NewUser, Profile, User};

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Authentication service.
pub struct AuthService<'a> {
    users: &'a dyn UserRepository,
}

impl<'a> AuthService<'a> {
    /// Create a new authentication service.
    #[must_use]
    pub const fn new(users: &'a dyn UserRepository) -> Self {
        Self { users }
    }

    /// Register a regular user from the sign-up form.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidUsername` if the username is malformed.
    /// Returns `AuthError::PasswordMismatch` if the two entries differ.
    /// Returns `AuthError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AuthError::UserAlreadyExists` if the username is taken.
    pub async fn register(
        &self,
        username: &str,
        password1: &str,
        password2: &str,
    ) -> Result<(User, Profile), AuthError> {
        if password1 != password2 {
            return Err(AuthError::PasswordMismatch);
        }
        self.create_user(username, password1, false, false).await
    }

    /// Create a user and its profile, optionally with staff or superuser flags.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`], minus the mismatch check.
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        is_staff: bool,
        is_superuser: bool,
    ) -> Result<(User, Profile), AuthError> {
        let username = Username::parse(username)?;
        validate_password(password)?;
        let password_hash = hash_password(password)?;

        self.users
            .create_with_profile(NewUser {
                username,
                password_hash,
                is_staff,
                is_superuser,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => AuthError::UserAlreadyExists,
                other => AuthError::Repository(other),
            })
    }

    /// Login with username and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the username/password is
    /// wrong or the account is inactive.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let username = Username::parse(username).map_err(|_| AuthError::InvalidCredentials)?;

        let (user, password_hash) = self
            .users
            .get_credentials(&username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &password_hash)?;

        if !user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }
}

/// Validate password meets requirements.
///
/// # Errors
///
/// Returns `AuthError::WeakPassword` describing the first failed rule.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::WeakPassword(
            "password can't be entirely numeric".to_string(),
        ));
    }

    Ok(())
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;

    #[test]
    fn test_validate_password() {
        assert!(matches!(
            validate_password("short"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(matches!(
            validate_password("1234567890"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(validate_password("correct horse").is_ok());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong-pass", &hash),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(verify_password("s3cret-pass", "not-a-hash").is_err());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let db = MemoryDatabase::shared();
        let auth = AuthService::new(db.as_ref());

        let (user, profile) = auth.register("alice", "pa55word!", "pa55word!").await.unwrap();
        assert_eq!(profile.user_id, user.id);
        assert!(!user.is_staff);

        let logged_in = auth.login("alice", "pa55word!").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        assert!(matches!(
            auth.login("alice", "nope-nope").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("bob", "pa55word!").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let db = MemoryDatabase::shared();
        let auth = AuthService::new(db.as_ref());

        assert!(matches!(
            auth.register("alice", "pa55word!", "pa55word?").await,
            Err(AuthError::PasswordMismatch)
        ));
        assert!(matches!(
            auth.register("bad name", "pa55word!", "pa55word!").await,
            Err(AuthError::InvalidUsername(_))
        ));

        auth.register("alice", "pa55word!", "pa55word!").await.unwrap();
        assert!(matches!(
            auth.register("alice", "pa55word!", "pa55word!").await,
            Err(AuthError::UserAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_create_superuser() {
        let db = MemoryDatabase::shared();
        let auth = AuthService::new(db.as_ref());
        let (user, _) = auth.create_user("admin", "adm1n-pass", true, true).await.unwrap();
        assert!(user.is_staff);
        assert!(user.is_superuser);
    }
}
