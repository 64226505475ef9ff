//! CLI command implementations.
//!
//! Every command except `migrate` works on a [`Repositories`] set and writes
//! its report to an `impl Write`, so the same code runs against `PostgreSQL`
//! from `main` and against the in-memory database in tests.

pub mod demo;
pub mod migrate;
pub mod user;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

use mysite_web::db::{self, Repositories, RepositoryError};
use mysite_web::services::auth::AuthError;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Repository error.
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// User creation failed.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// No user with this username.
    #[error("User does not exist: {0}")]
    UnknownUser(String),

    /// Writing the report failed.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the database URL from `MYSITE_DATABASE_URL` or `DATABASE_URL`.
///
/// # Errors
///
/// Returns `CommandError::MissingEnvVar` if neither is set.
pub fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("MYSITE_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("DATABASE_URL"))
}

/// Connect to `PostgreSQL` and build the repository set over the pool.
///
/// # Errors
///
/// Returns an error if the URL is missing or the connection fails.
pub async fn connect() -> Result<(PgPool, Repositories), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;
    let repos = Repositories::postgres(&pool);
    Ok((pool, repos))
}
