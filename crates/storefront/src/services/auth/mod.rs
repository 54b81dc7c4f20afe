//! Host account authentication.
//!
//! Storefront sign-ups do not create a host user directly: they create a
//! pending registration that the customer validation gate promotes once the
//! identity provider vouches for the same email.

mod error;

pub use error::AuthError;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use ec_relate_core::Email;

use crate::db::{PendingUserRepository, UserRepository};
use crate::models::{NewPendingUser, PendingUser, User};
use crate::services::crypto::random_token;

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_NAME_LENGTH: usize = 200;
const ISSUED_TOKEN_LENGTH: usize = 32;

/// Authentication service.
pub struct AuthService<'a> {
    users: &'a dyn UserRepository,
    pending: &'a dyn PendingUserRepository,
}

impl<'a> AuthService<'a> {
    #[must_use]
    pub const fn new(users: &'a dyn UserRepository, pending: &'a dyn PendingUserRepository) -> Self {
        Self { users, pending }
    }

    /// Record a storefront registration awaiting promotion.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` or `AuthError::WeakPassword` for bad
    /// input, and `AuthError::UserAlreadyExists` if a host user already owns
    /// the email.
    pub async fn register_pending(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<PendingUser, AuthError> {
        let email = Email::parse(email)?;
        validate_password(password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::UserAlreadyExists);
        }

        let name: String = name.trim().chars().take(MAX_NAME_LENGTH).collect();
        let pending = self
            .pending
            .create(NewPendingUser {
                email,
                name,
                password_hash: hash_password(password)?,
                issued_token: random_token(ISSUED_TOKEN_LENGTH),
            })
            .await?;

        tracing::info!(pending_id = %pending.id, "Pending registration created");
        Ok(pending)
    }

    /// Login with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email/password is wrong.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let hash = self
            .users
            .password_hash(user.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &hash)?;
        Ok(user)
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns `AuthError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).is_ok());
        assert!(matches!(
            verify_password("wrong horse", &hash),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(
            validate_password("short"),
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn test_register_pending_then_promote_then_login() {
        let db = MemoryDb::new();
        let auth = AuthService::new(&db, &db);

        let pending = auth
            .register_pending("shopper@shop.test", " Shopper ", "hunter2hunter2")
            .await
            .unwrap();
        assert_eq!(pending.name, "Shopper");
        assert_eq!(pending.issued_token.len(), ISSUED_TOKEN_LENGTH);
        assert!(matches!(
            auth.login("shopper@shop.test", "hunter2hunter2").await,
            Err(AuthError::InvalidCredentials)
        ));

        db.promote(pending.id, "gid://shopify/Customer/1")
            .await
            .unwrap()
            .unwrap();

        let user = auth
            .login("Shopper@Shop.test", "hunter2hunter2")
            .await
            .unwrap();
        assert_eq!(user.email.as_str(), "shopper@shop.test");
    }

    #[tokio::test]
    async fn test_register_rejects_existing_user() {
        let db = MemoryDb::new();
        let email = Email::parse("taken@shop.test").unwrap();
        UserRepository::create(&db, &email, "T", "h").await.unwrap();

        let auth = AuthService::new(&db, &db);
        assert!(matches!(
            auth.register_pending("taken@shop.test", "T", "longenough").await,
            Err(AuthError::UserAlreadyExists)
        ));
    }
}
