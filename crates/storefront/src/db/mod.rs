//! Persistence for host accounts and per-user cart metadata.
//!
//! # Tables
//!
//! - `users` - Host accounts (separate from commerce customers)
//! - `user_meta` - Per-user key/value pairs (`shopify_cart_id`, `shopify_customer_id`)
//! - `pending_users` - Storefront registrations awaiting promotion
//! - `tower_sessions.session` - Tower-sessions storage
//!
//! Each table is reached through a trait so services can run against the
//! in-memory implementation in [`memory`] as well as `PostgreSQL`.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p ec-relate-cli -- migrate
//! ```

pub mod memory;
mod pending_users;
mod user_meta;
mod users;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use ec_relate_core::{Email, PendingUserId, UserId};

use crate::models::{NewPendingUser, PendingUser, User};

pub use pending_users::PgPendingUserRepository;
pub use user_meta::PgUserMetaRepository;
pub use users::PgUserRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Map a unique violation to [`RepositoryError::Conflict`].
fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}

/// Keys stored in `user_meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    /// The user's bound cart handle.
    ShopifyCartId,
    /// The commerce customer confirmed for this user.
    ShopifyCustomerId,
}

impl MetaKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShopifyCartId => "shopify_cart_id",
            Self::ShopifyCustomerId => "shopify_customer_id",
        }
    }
}

/// Host user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn password_hash(&self, id: UserId) -> Result<Option<String>, RepositoryError>;

    /// Returns [`RepositoryError::Conflict`] if the email is taken.
    async fn create(
        &self,
        email: &Email,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError>;
}

/// Per-user metadata.
#[async_trait]
pub trait UserMetaRepository: Send + Sync {
    async fn get(&self, user: UserId, key: MetaKey) -> Result<Option<String>, RepositoryError>;

    /// Insert or overwrite.
    async fn set(&self, user: UserId, key: MetaKey, value: &str) -> Result<(), RepositoryError>;

    async fn delete(&self, user: UserId, key: MetaKey) -> Result<(), RepositoryError>;
}

/// Pending storefront registrations.
#[async_trait]
pub trait PendingUserRepository: Send + Sync {
    async fn create(&self, new: NewPendingUser) -> Result<PendingUser, RepositoryError>;

    /// Most recent unused registration for the email (case-insensitive).
    async fn find_unused_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<PendingUser>, RepositoryError>;

    /// Consume the registration and create the real user in one step.
    ///
    /// Returns `Ok(None)` when the record was already consumed, so concurrent
    /// promotions of the same record produce exactly one user.
    async fn promote(
        &self,
        id: PendingUserId,
        customer_id: &str,
    ) -> Result<Option<User>, RepositoryError>;

    /// Delete unused registrations created before `cutoff`.
    async fn prune_unused_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
