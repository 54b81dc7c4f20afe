//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! ec-relate-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `BRIDGE_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! # Migration Files
//!
//! `crates/storefront/migrations/`: users, user metadata, pending users and
//! the session table.

use super::{CommandError, connect};

/// Run the bridge database migrations.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running bridge migrations...");
    sqlx::migrate!("../storefront/migrations").run(&pool).await?;

    tracing::info!("Bridge migrations complete!");
    Ok(())
}
