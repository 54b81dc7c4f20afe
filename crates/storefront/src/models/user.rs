//! Host account domain types.
//!
//! Host users are the site's own accounts, separate from commerce customers.
//! A pending user is a registration waiting for the identity provider to
//! confirm the same email.

use chrono::{DateTime, Utc};

use ec_relate_core::{Email, PendingUserId, UserId};

/// A host user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// A storefront registration that has not been promoted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUser {
    pub id: PendingUserId,
    pub email: Email,
    pub name: String,
    /// Argon2 PHC string, copied onto the real user at promotion.
    pub password_hash: String,
    /// One-time token handed to the registrant.
    pub issued_token: String,
    pub created_at: DateTime<Utc>,
    /// Commerce customer id that consumed this record, if any.
    pub used_by: Option<String>,
}

impl PendingUser {
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used_by.is_some()
    }
}

/// Input for a new pending registration.
#[derive(Debug, Clone)]
pub struct NewPendingUser {
    pub email: Email,
    pub name: String,
    pub password_hash: String,
    pub issued_token: String,
}
