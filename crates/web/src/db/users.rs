//! User repository for database operations.
//!
//! Users, their profiles, groups and permission codenames.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use mysite_core::{GroupId, ProfileId, UserId, Username};

use super::{RepositoryError, UserRepository, map_write_error};
use crate::models::{NewUser, Profile, User};

const USER_COLUMNS: &str =
    "id, username, email, first_name, last_name, is_staff, is_superuser, is_active, date_joined";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: UserId,
    username: String,
    email: Option<String>,
    first_name: String,
    last_name: String,
    is_staff: bool,
    is_superuser: bool,
    is_active: bool,
    date_joined: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let username = Username::parse(&row.username).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid username in database: {e}"))
        })?;

        Ok(Self {
            id: row.id,
            username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            is_staff: row.is_staff,
            is_superuser: row.is_superuser,
            is_active: row.is_active,
            date_joined: row.date_joined,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: ProfileId,
    user_id: UserId,
    avatar: Option<String>,
    bio: String,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            avatar: row.avatar,
            bio: row.bio,
        }
    }
}

/// Get or create a permission row by codename.
async fn ensure_permission(conn: &mut PgConnection, codename: &str) -> Result<i32, RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO auth_permission (codename, name)
        VALUES ($1, $1)
        ON CONFLICT (codename) DO UPDATE SET codename = EXCLUDED.codename
        RETURNING id
        ",
    )
    .bind(codename)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// sqlx implementation of [`UserRepository`].
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM auth_user WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM auth_user WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn get_credentials(
        &self,
        username: &Username,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        let row = sqlx::query_as::<_, CredentialsRow>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM auth_user WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some((User::try_from(r.user)?, r.password_hash))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM auth_user ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    #[instrument(skip(self))]
    async fn usernames(&self) -> Result<Vec<Username>, RepositoryError> {
        let names: Vec<Username> =
            sqlx::query_scalar("SELECT username FROM auth_user ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_with_profile(&self, user: NewUser) -> Result<(User, Profile), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO auth_user (username, password_hash, is_staff, is_superuser)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "username"))?;
        let created = User::try_from(row)?;

        let profile = sqlx::query_as::<_, ProfileRow>(
            r"
            INSERT INTO auth_profile (user_id)
            VALUES ($1)
            RETURNING id, user_id, avatar, bio
            ",
        )
        .bind(created.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id = %created.id, "User created");
        Ok((created, profile.into()))
    }

    #[instrument(skip(self))]
    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, user_id, avatar, bio FROM auth_profile WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    #[instrument(skip(self))]
    async fn set_avatar(&self, user_id: UserId, avatar: &str) -> Result<Profile, RepositoryError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"
            INSERT INTO auth_profile (user_id, avatar)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET avatar = EXCLUDED.avatar
            RETURNING id, user_id, avatar, bio
            ",
        )
        .bind(user_id)
        .bind(avatar)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "profile"))?;
        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn permissions(&self, user_id: UserId) -> Result<BTreeSet<String>, RepositoryError> {
        let codenames: Vec<String> = sqlx::query_scalar(
            r"
            SELECT p.codename
            FROM auth_permission p
            JOIN auth_user_permissions up ON up.permission_id = p.id
            WHERE up.user_id = $1
            UNION
            SELECT p.codename
            FROM auth_permission p
            JOIN auth_group_permissions gp ON gp.permission_id = p.id
            JOIN auth_user_groups ug ON ug.group_id = gp.group_id
            WHERE ug.user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codenames.into_iter().collect())
    }

    #[instrument(skip(self))]
    async fn grant_permission(&self, user_id: UserId, codename: &str) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let permission_id = ensure_permission(&mut tx, codename).await?;
        sqlx::query(
            r"
            INSERT INTO auth_user_permissions (user_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "user permission"))?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_group(&self, name: &str) -> Result<GroupId, RepositoryError> {
        let id: GroupId = sqlx::query_scalar(
            r"
            INSERT INTO auth_group (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            ",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn grant_group_permission(
        &self,
        group_id: GroupId,
        codename: &str,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let permission_id = ensure_permission(&mut tx, codename).await?;
        sqlx::query(
            r"
            INSERT INTO auth_group_permissions (group_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(group_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, "group permission"))?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_to_group(&self, user_id: UserId, group_id: GroupId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO auth_user_groups (user_id, group_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "user group"))?;
        Ok(())
    }
}
