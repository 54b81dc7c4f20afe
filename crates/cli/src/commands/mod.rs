//! CLI command implementations.

pub mod migrate;
pub mod pending;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

/// Errors shared by the database commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] ec_relate_storefront::db::RepositoryError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Connect to the bridge database.
///
/// Reads `BRIDGE_DATABASE_URL`, falling back to `DATABASE_URL`.
pub async fn connect() -> Result<PgPool, CommandError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("BRIDGE_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| CommandError::MissingEnvVar("BRIDGE_DATABASE_URL"))?;

    tracing::info!("Connecting to bridge database...");
    Ok(ec_relate_storefront::db::create_pool(&SecretString::from(database_url)).await?)
}
