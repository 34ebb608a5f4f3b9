//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! df-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `STOREFRONT_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! # Migration Files
//!
//! Storefront migrations live in `crates/storefront/migrations/`. The
//! tower-sessions table is created by the session store itself.

use tower_sessions_sqlx_store::PostgresStore;
use tracing::info;

use super::{CommandError, database_url};

/// Run storefront database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails, or
/// a migration fails.
pub async fn storefront() -> Result<(), CommandError> {
    let database_url = database_url()?;

    info!("Connecting to storefront database...");
    let pool = daily_fresh_storefront::db::create_pool(&database_url).await?;

    info!("Running storefront migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    info!("Creating session table...");
    PostgresStore::new(pool.clone())
        .migrate()
        .await
        .map_err(|e| CommandError::SessionStore(e.to_string()))?;

    info!("Storefront migrations complete!");
    Ok(())
}
