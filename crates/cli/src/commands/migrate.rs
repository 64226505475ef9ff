//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! mysite-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` (or `MYSITE_DATABASE_URL`) - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! The schema lives in `crates/web/migrations/`; the session table is
//! created by `tower-sessions-sqlx-store`.

use tower_sessions_sqlx_store::PostgresStore;

use super::CommandError;

/// Run the bundled migrations, then create the session table.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let (pool, _) = super::connect().await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../web/migrations").run(&pool).await?;

    tracing::info!("Creating session table...");
    PostgresStore::new(pool).migrate().await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
