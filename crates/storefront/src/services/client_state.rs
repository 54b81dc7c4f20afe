//! Typed, session-backed client state.
//!
//! Everything the browser would otherwise keep in local storage lives here:
//! the logged-in host user, commerce tokens, the in-flight OAuth login and
//! the record of the last bind. One-time values are read with `take_*`,
//! which removes them whatever the caller does next.

use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use ec_relate_core::{CartHandle, UserId};

use crate::models::{CurrentUser, keys};
use crate::services::crypto::{fingerprint, random_token};
use crate::shopify::CustomerAccessToken;

pub type SessionResult<T> = Result<T, tower_sessions::session::Error>;

const REST_NONCE_LENGTH: usize = 32;

/// OAuth login awaiting its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// Exact signed `state` value sent to the provider.
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
    /// Unix timestamp after which the login is abandoned.
    pub expires_at: i64,
}

/// The (cart, token) pair most recently bound in this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRecord {
    pub cart: CartHandle,
    pub token_fingerprint: String,
}

impl BindRecord {
    #[must_use]
    pub fn new(cart: CartHandle, access_token: &str) -> Self {
        Self {
            cart,
            token_fingerprint: fingerprint(access_token),
        }
    }

    #[must_use]
    pub fn covers(&self, cart: &CartHandle, access_token: &str) -> bool {
        &self.cart == cart && self.token_fingerprint == fingerprint(access_token)
    }
}

/// A host user whose email the identity provider confirmed for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerMatch {
    pub user_id: UserId,
    pub customer_id: String,
    pub token_fingerprint: String,
}

/// Session-backed state for one browser.
#[derive(Clone, Debug)]
pub struct ClientState {
    session: Session,
}

impl ClientState {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    /// Opaque key for this browser's session, once it has been saved.
    #[must_use]
    pub fn browser_key(&self) -> Option<String> {
        self.session.id().map(|id| fingerprint(&id.to_string()))
    }

    pub async fn current_user(&self) -> SessionResult<Option<CurrentUser>> {
        self.session.get(keys::CURRENT_USER).await
    }

    /// Log a host user in. Rotates the session id and forgets the last bind
    /// and any customer match made for the previous user.
    pub async fn log_in(&self, user: &CurrentUser) -> SessionResult<()> {
        self.session.cycle_id().await?;
        self.session.insert(keys::CURRENT_USER, user).await?;
        self.session.remove_value(keys::LAST_BIND).await?;
        self.session.remove_value(keys::CUSTOMER_MATCH).await?;
        Ok(())
    }

    pub async fn customer_token(&self) -> SessionResult<Option<CustomerAccessToken>> {
        self.session.get(keys::CUSTOMER_TOKEN).await
    }

    pub async fn set_customer_token(&self, token: &CustomerAccessToken) -> SessionResult<()> {
        self.session.insert(keys::CUSTOMER_TOKEN, token).await
    }

    pub async fn clear_customer_token(&self) -> SessionResult<()> {
        self.session.remove_value(keys::CUSTOMER_TOKEN).await?;
        self.session.remove_value(keys::LAST_BIND).await?;
        self.session.remove_value(keys::CUSTOMER_MATCH).await?;
        Ok(())
    }

    /// Record that `access_token` belongs to `user_id`'s customer account.
    pub async fn confirm_customer(
        &self,
        user_id: UserId,
        customer_id: &str,
        access_token: &str,
    ) -> SessionResult<()> {
        let record = CustomerMatch {
            user_id,
            customer_id: customer_id.to_string(),
            token_fingerprint: fingerprint(access_token),
        };
        self.session.insert(keys::CUSTOMER_MATCH, &record).await
    }

    pub async fn forget_customer_match(&self) -> SessionResult<()> {
        self.session.remove_value(keys::CUSTOMER_MATCH).await?;
        Ok(())
    }

    /// Whether the gate matched `access_token` to `user_id`.
    pub async fn customer_confirmed(&self, user_id: UserId, access_token: &str) -> SessionResult<bool> {
        let record: Option<CustomerMatch> = self.session.get(keys::CUSTOMER_MATCH).await?;
        Ok(record.is_some_and(|m| {
            m.user_id == user_id && m.token_fingerprint == fingerprint(access_token)
        }))
    }

    /// Store an OAuth login, replacing any earlier one.
    pub async fn put_pending_login(&self, login: &PendingLogin) -> SessionResult<()> {
        self.session.insert(keys::OAUTH_PENDING, login).await
    }

    /// Remove and return the in-flight OAuth login.
    pub async fn take_pending_login(&self) -> SessionResult<Option<PendingLogin>> {
        self.session.remove(keys::OAUTH_PENDING).await
    }

    pub async fn last_bind(&self) -> SessionResult<Option<BindRecord>> {
        self.session.get(keys::LAST_BIND).await
    }

    pub async fn record_bind(&self, record: &BindRecord) -> SessionResult<()> {
        self.session.insert(keys::LAST_BIND, record).await
    }

    /// The session's REST nonce, issuing one on first use.
    pub async fn rest_nonce(&self) -> SessionResult<String> {
        if let Some(nonce) = self.session.get::<String>(keys::REST_NONCE).await? {
            return Ok(nonce);
        }
        let nonce = random_token(REST_NONCE_LENGTH);
        self.session.insert(keys::REST_NONCE, &nonce).await?;
        Ok(nonce)
    }

    /// Nonce without issuing one.
    pub async fn existing_rest_nonce(&self) -> SessionResult<Option<String>> {
        self.session.get(keys::REST_NONCE).await
    }

    /// Drop everything: user, tokens, OAuth state, bind record, nonce.
    pub async fn flush(&self) -> SessionResult<()> {
        self.session.flush().await
    }
}
