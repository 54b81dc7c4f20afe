//! OAuth authorization code + PKCE exchange with the customer identity provider.
//!
//! ```text
//! Idle -> AwaitingCallback -> Exchanging -> Complete
//!                 \                \
//!                  +----------------+--> Failed
//! ```
//!
//! The signed `state` parameter is `base64url(json) "." base64url(hmac)`. The
//! pending login stored in the session must equal it byte for byte, and is
//! removed the moment the callback reads it, so a replayed callback always
//! fails.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::services::client_state::{ClientState, PendingLogin};
use crate::services::crypto::{PkcePair, Signer, random_token};
use crate::shopify::{CustomerAccessToken, IdentityProvider, ShopifyError};

const NONCE_LENGTH: usize = 32;

/// Where an exchange stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Idle,
    AwaitingCallback,
    Exchanging,
    Complete,
    Failed,
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("no login in progress")]
    NoPendingLogin,

    #[error("login expired")]
    Expired,

    #[error("state mismatch")]
    StateMismatch,

    #[error("invalid state signature")]
    BadSignature,

    #[error("code verifier missing")]
    MissingVerifier,

    #[error("invalid logout link")]
    InvalidLogoutLink,

    #[error("identity provider error: {0}")]
    Provider(#[from] ShopifyError),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl ExchangeError {
    /// Whether the request itself was bad, as opposed to an upstream failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        !matches!(self, Self::Provider(_) | Self::Session(_))
    }
}

/// Payload carried inside the signed `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub nonce: String,
    pub return_url: String,
    pub issued_at: i64,
}

/// Serialize and sign a state payload.
#[must_use]
pub fn encode_state(signer: &Signer, payload: &StatePayload) -> String {
    // Serializing a struct of strings and an integer cannot fail.
    let json = serde_json::to_vec(payload).unwrap_or_default();
    let body = URL_SAFE_NO_PAD.encode(json);
    let signature = signer.sign(body.as_bytes());
    format!("{body}.{signature}")
}

/// Verify and decode a signed state.
///
/// # Errors
///
/// Returns [`ExchangeError::BadSignature`] when the value is malformed or the
/// signature does not verify.
pub fn decode_state(signer: &Signer, state: &str) -> Result<StatePayload, ExchangeError> {
    let (body, signature) = state.split_once('.').ok_or(ExchangeError::BadSignature)?;
    if !signer.verify(body.as_bytes(), signature) {
        return Err(ExchangeError::BadSignature);
    }
    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| ExchangeError::BadSignature)?;
    serde_json::from_slice(&json).map_err(|_| ExchangeError::BadSignature)
}

/// Keep only same-origin relative paths; anything else becomes `/`.
#[must_use]
pub fn sanitize_return_url(url: &str) -> String {
    let url = url.trim();
    let relative = url.starts_with('/')
        && !url.starts_with("//")
        && !url.contains('\\')
        && !url.chars().any(char::is_control);
    if relative {
        url.to_string()
    } else {
        "/".to_string()
    }
}

/// A finished exchange.
#[derive(Debug, Clone)]
pub struct Completed {
    pub token: CustomerAccessToken,
    pub return_url: String,
}

/// Runs one browser's login against the identity provider.
pub struct TokenExchange<'a> {
    identity: &'a dyn IdentityProvider,
    signer: &'a Signer,
    redirect_uri: &'a str,
    state_ttl: Duration,
}

impl<'a> TokenExchange<'a> {
    #[must_use]
    pub const fn new(
        identity: &'a dyn IdentityProvider,
        signer: &'a Signer,
        redirect_uri: &'a str,
        state_ttl: Duration,
    ) -> Self {
        Self {
            identity,
            signer,
            redirect_uri,
            state_ttl,
        }
    }

    /// Start a login and return the provider's authorization URL.
    ///
    /// Any earlier unfinished login in this session is replaced.
    ///
    /// # Errors
    ///
    /// Fails only if the session cannot be written.
    #[instrument(skip(self, client))]
    pub async fn begin(&self, client: &ClientState, return_url: &str) -> Result<String, ExchangeError> {
        self.begin_at(client, return_url, chrono::Utc::now().timestamp())
            .await
    }

    async fn begin_at(
        &self,
        client: &ClientState,
        return_url: &str,
        now: i64,
    ) -> Result<String, ExchangeError> {
        let pkce = PkcePair::generate();
        let payload = StatePayload {
            nonce: random_token(NONCE_LENGTH),
            return_url: sanitize_return_url(return_url),
            issued_at: now,
        };
        let state = encode_state(self.signer, &payload);

        client
            .put_pending_login(&PendingLogin {
                state: state.clone(),
                nonce: payload.nonce.clone(),
                code_verifier: pkce.verifier,
                expires_at: now.saturating_add(ttl_secs(self.state_ttl)),
            })
            .await?;

        tracing::debug!(state = ?ExchangeState::AwaitingCallback, "OAuth login started");

        Ok(self.identity.authorization_url(
            self.redirect_uri,
            &state,
            &payload.nonce,
            &pkce.challenge,
        ))
    }

    /// Finish a login from the callback's `code` and `state`.
    ///
    /// The pending login is consumed before any check runs. On success the
    /// tokens are stored in the session.
    ///
    /// # Errors
    ///
    /// Validation failures leave no token behind; provider failures are not
    /// retried.
    #[instrument(skip_all)]
    pub async fn complete(
        &self,
        client: &ClientState,
        code: &str,
        state: &str,
    ) -> Result<Completed, ExchangeError> {
        let result = self
            .complete_at(client, code, state, chrono::Utc::now().timestamp())
            .await;
        match &result {
            Ok(_) => tracing::info!(state = ?ExchangeState::Complete, "customer token obtained"),
            Err(e) => tracing::warn!(state = ?ExchangeState::Failed, error = %e, "token exchange failed"),
        }
        result
    }

    async fn complete_at(
        &self,
        client: &ClientState,
        code: &str,
        state: &str,
        now: i64,
    ) -> Result<Completed, ExchangeError> {
        let pending = client.take_pending_login().await?;

        if code.is_empty() {
            return Err(ExchangeError::MissingParameter("code"));
        }
        if state.is_empty() {
            return Err(ExchangeError::MissingParameter("state"));
        }
        let pending = pending.ok_or(ExchangeError::NoPendingLogin)?;
        if now > pending.expires_at {
            return Err(ExchangeError::Expired);
        }
        if pending.state != state {
            return Err(ExchangeError::StateMismatch);
        }
        let payload = decode_state(self.signer, state)?;
        if payload.nonce != pending.nonce {
            return Err(ExchangeError::StateMismatch);
        }
        if pending.code_verifier.is_empty() {
            return Err(ExchangeError::MissingVerifier);
        }

        tracing::debug!(state = ?ExchangeState::Exchanging, "exchanging authorization code");
        let token = self
            .identity
            .exchange_code(code, &pending.code_verifier, self.redirect_uri)
            .await?;
        client.set_customer_token(&token).await?;

        Ok(Completed {
            token,
            return_url: sanitize_return_url(&payload.return_url),
        })
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

/// Query parameters of a signed host logout link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutLink {
    pub return_to: String,
    pub expires: i64,
    pub sig: String,
}

impl LogoutLink {
    fn payload(return_to: &str, expires: i64) -> String {
        format!("logout|{return_to}|{expires}")
    }

    /// Sign a logout link valid for `ttl` from `now`.
    #[must_use]
    pub fn issue(signer: &Signer, return_to: &str, now: i64, ttl: Duration) -> Self {
        let return_to = sanitize_return_url(return_to);
        let expires = now.saturating_add(ttl_secs(ttl));
        let sig = signer.sign(Self::payload(&return_to, expires).as_bytes());
        Self {
            return_to,
            expires,
            sig,
        }
    }

    /// Absolute URL of the link under `base_url`.
    #[must_use]
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{base_url}/auth/logout?return_to={}&expires={}&sig={}",
            urlencoding::encode(&self.return_to),
            self.expires,
            urlencoding::encode(&self.sig),
        )
    }

    /// Check signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidLogoutLink`] if either check fails.
    pub fn verify(&self, signer: &Signer, now: i64) -> Result<(), ExchangeError> {
        let signed = signer.verify(
            Self::payload(&self.return_to, self.expires).as_bytes(),
            &self.sig,
        );
        if signed && now <= self.expires {
            Ok(())
        } else {
            Err(ExchangeError::InvalidLogoutLink)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use tower_sessions::{MemoryStore, Session};

    use super::*;
    use crate::services::crypto::s256_challenge;
    use crate::shopify::Customer;

    /// Records what the exchange sent to the provider.
    #[derive(Default)]
    struct RecordingProvider {
        challenges: Mutex<Vec<String>>,
        exchanges: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl IdentityProvider for RecordingProvider {
        fn authorization_url(&self, _: &str, state: &str, _: &str, challenge: &str) -> String {
            self.challenges.lock().unwrap().push(challenge.to_string());
            format!("https://id.test/authorize?state={state}")
        }

        fn logout_url(&self, _: &str, _: &str) -> String {
            String::new()
        }

        async fn exchange_code(
            &self,
            code: &str,
            verifier: &str,
            _: &str,
        ) -> Result<CustomerAccessToken, ShopifyError> {
            self.exchanges
                .lock()
                .unwrap()
                .push((code.to_string(), verifier.to_string()));
            if self.fail {
                return Err(ShopifyError::OAuth("invalid_grant".to_string()));
            }
            Ok(CustomerAccessToken {
                access_token: "at".to_string(),
                id_token: Some("it".to_string()),
                refresh_token: Some("rt".to_string()),
                expires_in: Some(3600),
                obtained_at: 0,
            })
        }

        async fn refresh_token(&self, _: &str) -> Result<CustomerAccessToken, ShopifyError> {
            Err(ShopifyError::OAuth("unused".to_string()))
        }

        async fn current_customer(&self, _: &str) -> Result<Customer, ShopifyError> {
            Err(ShopifyError::OAuth("unused".to_string()))
        }
    }

    fn signer() -> Signer {
        Signer::new(SecretString::from("s".repeat(48)))
    }

    fn client() -> ClientState {
        ClientState::new(Session::new(None, Arc::new(MemoryStore::default()), None))
    }

    fn state_from(url: &str) -> String {
        let raw = url.split("state=").nth(1).unwrap();
        raw.to_string()
    }

    #[tokio::test]
    async fn full_flow_stores_token_and_returns_origin() {
        let provider = RecordingProvider::default();
        let signer = signer();
        let flow = TokenExchange::new(&provider, &signer, "https://shop.test/cb", Duration::from_secs(600));
        let client = client();

        let url = flow.begin_at(&client, "/products/mug?x=1", 1_000).await.unwrap();
        let state = state_from(&url);
        let done = flow.complete_at(&client, "code-1", &state, 1_100).await.unwrap();

        assert_eq!(done.return_url, "/products/mug?x=1");
        assert_eq!(client.customer_token().await.unwrap().unwrap().access_token, "at");

        let (code, verifier) = provider.exchanges.lock().unwrap()[0].clone();
        assert_eq!(code, "code-1");
        assert_eq!(s256_challenge(&verifier), provider.challenges.lock().unwrap()[0]);
    }

    #[tokio::test]
    async fn replayed_callback_is_rejected() {
        let provider = RecordingProvider::default();
        let signer = signer();
        let flow = TokenExchange::new(&provider, &signer, "cb", Duration::from_secs(600));
        let client = client();

        let state = state_from(&flow.begin_at(&client, "/", 0).await.unwrap());
        flow.complete_at(&client, "c", &state, 1).await.unwrap();
        let replay = flow.complete_at(&client, "c", &state, 2).await;

        assert!(matches!(replay, Err(ExchangeError::NoPendingLogin)));
        assert_eq!(provider.exchanges.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mismatched_or_expired_state_never_exchanges() {
        let provider = RecordingProvider::default();
        let signer = signer();
        let flow = TokenExchange::new(&provider, &signer, "cb", Duration::from_secs(600));

        let client = client();
        flow.begin_at(&client, "/", 0).await.unwrap();
        let forged = encode_state(
            &signer,
            &StatePayload {
                nonce: "other".to_string(),
                return_url: "/".to_string(),
                issued_at: 0,
            },
        );
        assert!(matches!(
            flow.complete_at(&client, "c", &forged, 1).await,
            Err(ExchangeError::StateMismatch)
        ));
        // The failed attempt still consumed the pending login.
        assert!(client.take_pending_login().await.unwrap().is_none());

        let client = self::client();
        let state = state_from(&flow.begin_at(&client, "/", 0).await.unwrap());
        assert!(matches!(
            flow.complete_at(&client, "c", &state, 601).await,
            Err(ExchangeError::Expired)
        ));

        assert!(provider.exchanges.lock().unwrap().is_empty());
        assert!(client.customer_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provider_failure_stores_nothing() {
        let provider = RecordingProvider {
            fail: true,
            ..RecordingProvider::default()
        };
        let signer = signer();
        let flow = TokenExchange::new(&provider, &signer, "cb", Duration::from_secs(600));
        let client = client();

        let state = state_from(&flow.begin_at(&client, "/", 0).await.unwrap());
        let err = flow.complete_at(&client, "c", &state, 1).await.unwrap_err();

        assert!(!err.is_validation());
        assert!(client.customer_token().await.unwrap().is_none());
    }

    #[test]
    fn tampered_state_fails_signature() {
        let signer = signer();
        let state = encode_state(
            &signer,
            &StatePayload {
                nonce: "n".to_string(),
                return_url: "/a".to_string(),
                issued_at: 5,
            },
        );
        assert_eq!(decode_state(&signer, &state).unwrap().return_url, "/a");

        let (body, sig) = state.split_once('.').unwrap();
        let tampered = format!("{body}x.{sig}");
        assert!(matches!(
            decode_state(&signer, &tampered),
            Err(ExchangeError::BadSignature)
        ));
        assert!(decode_state(&signer, "no-dot").is_err());
    }

    #[test]
    fn return_urls_stay_on_site() {
        assert_eq!(sanitize_return_url("/cart"), "/cart");
        assert_eq!(sanitize_return_url("https://evil.test/"), "/");
        assert_eq!(sanitize_return_url("//evil.test"), "/");
        assert_eq!(sanitize_return_url("/\\evil.test"), "/");
        assert_eq!(sanitize_return_url(""), "/");
    }

    #[test]
    fn logout_links_expire_and_resist_tampering() {
        let signer = signer();
        let link = LogoutLink::issue(&signer, "/account", 100, Duration::from_secs(300));
        assert!(link.verify(&signer, 400).is_ok());
        assert!(link.verify(&signer, 401).is_err());

        let moved = LogoutLink {
            return_to: "/elsewhere".to_string(),
            ..link.clone()
        };
        assert!(moved.verify(&signer, 100).is_err());

        assert_eq!(
            link.url("https://shop.test"),
            format!(
                "https://shop.test/auth/logout?return_to=%2Faccount&expires=400&sig={}",
                link.sig
            )
        );
    }
}
