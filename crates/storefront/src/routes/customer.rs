//! Customer and host account JSON endpoints.
//!
//! ```text
//! GET      /api/v1/nonce                    - Issue the session's REST nonce
//! POST     /api/v1/customer-token-exchange  - Finish an OAuth login from JS
//! GET|POST /api/v1/validate-customer        - Run the validation gate
//! POST     /api/v1/wp-logout-redirect       - Signed host logout URL
//! POST     /api/v1/register                 - Create a pending registration
//! POST     /api/v1/login                    - Host login
//! ```

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use ec_relate_core::{CartHandle, UserId};

use crate::error::{Result, add_breadcrumb, set_sentry_user};
use crate::middleware::{CartCookie, CartCookieUpdate, OptionalAuth, VerifiedNonce};
use crate::models::CurrentUser;
use crate::services::client_state::ClientState;
use crate::services::identity::{CookieChange, IdentityContext, IdentityStore};
use crate::services::token_exchange::LogoutLink;
use crate::services::validation::{GateOutcome, GateView};
use crate::shopify::CustomerAccessToken;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct NonceView {
    pub success: bool,
    pub nonce: String,
}

/// Issue (or repeat) the session's REST nonce.
#[instrument(skip_all)]
pub async fn nonce(client: ClientState) -> Result<Json<NonceView>> {
    let nonce = client.rest_nonce().await?;
    Ok(Json(NonceView {
        success: true,
        nonce,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenExchangeRequest {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenExchangeView {
    pub success: bool,
    pub return_url: String,
    pub cart_id: Option<CartHandle>,
    /// Whether the visitor's cart was attached to the customer.
    pub bound: bool,
}

/// Finish an OAuth login whose callback was caught by client script.
#[instrument(skip_all)]
pub async fn token_exchange(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    client: ClientState,
    OptionalAuth(user): OptionalAuth,
    CartCookie(cookie): CartCookie,
    Json(body): Json<TokenExchangeRequest>,
) -> Result<(CartCookieUpdate, Json<TokenExchangeView>)> {
    let redirect_uri = state.config().oauth_redirect_uri();
    let completed = state
        .token_exchange(&redirect_uri)
        .complete(
            &client,
            body.code.as_deref().unwrap_or_default(),
            body.state.as_deref().unwrap_or_default(),
        )
        .await?;

    let user_id = user.map(|u| u.id);
    let (change, cart_id, bound) =
        bind_after_login(&state, &client, user_id, cookie, &completed.token).await;

    let config = state.config();
    Ok((
        CartCookieUpdate::new(change, config.cart.cookie_ttl, config.secure_cookies()),
        Json(TokenExchangeView {
            success: true,
            return_url: completed.return_url,
            cart_id,
            bound,
        }),
    ))
}

/// Attach the visitor's existing cart to a freshly logged-in customer.
///
/// A host user's cart waits for the validation gate to match the customer;
/// the next reconciliation binds it then. Failures are logged and leave the
/// cart as it was; the login itself has already succeeded.
pub(super) async fn bind_after_login(
    state: &AppState,
    client: &ClientState,
    user_id: Option<UserId>,
    cookie: Option<CartHandle>,
    token: &CustomerAccessToken,
) -> (CookieChange, Option<CartHandle>, bool) {
    let ctx = IdentityContext {
        user_id,
        cookie_handle: cookie,
        browser: client.browser_key(),
    };
    let handle = match IdentityStore::new(state.meta()).resolve(&ctx, None).await {
        Ok(ownership) => ownership.handle().cloned(),
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve cart after login");
            None
        }
    };
    let Some(handle) = handle else {
        return (CookieChange::Keep, None, false);
    };
    if let Some(user_id) = user_id {
        match client.customer_confirmed(user_id, &token.access_token).await {
            Ok(true) => {}
            Ok(false) => return (CookieChange::Keep, Some(handle), false),
            Err(e) => {
                tracing::warn!(error = %e, "could not read customer match after login");
                return (CookieChange::Keep, Some(handle), false);
            }
        }
    }

    match state
        .cart_engine()
        .bind(client, user_id, &handle, &token.access_token, None)
        .await
    {
        Ok(outcome) => {
            let cart_id = outcome.cart.map_or(handle, |c| c.id);
            (outcome.cookie, Some(cart_id), outcome.performed)
        }
        Err(e) => {
            tracing::warn!(error = %e, cart_id = %handle, "bind after login failed");
            (CookieChange::Keep, Some(handle), false)
        }
    }
}

/// Run the customer validation gate.
#[instrument(skip_all)]
pub async fn validate_customer(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    client: ClientState,
) -> Result<Json<GateView>> {
    let outcome = state.validation_gate().run(&client).await?;
    if let GateOutcome::Promoted { user, .. } = &outcome {
        set_sentry_user(&user.id, Some(user.email.as_str()));
        add_breadcrumb("auth", "pending user promoted", None);
    }
    Ok(Json(GateView::from(&outcome)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRedirectRequest {
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutRedirectView {
    pub success: bool,
    pub url: String,
}

/// Hand out a signed, expiring host logout URL.
#[instrument(skip_all)]
pub async fn logout_redirect(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    Json(body): Json<LogoutRedirectRequest>,
) -> Json<LogoutRedirectView> {
    let config = state.config();
    let link = LogoutLink::issue(
        state.signer(),
        body.return_url.as_deref().unwrap_or("/"),
        chrono::Utc::now().timestamp(),
        config.cart.logout_link_ttl,
    );
    Json(LogoutRedirectView {
        success: true,
        url: link.url(&config.base_url),
    })
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterView {
    pub success: bool,
    pub status: &'static str,
    pub email: String,
}

/// Create a pending registration.
///
/// The account becomes real once the same email logs in through the
/// identity provider.
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<RegisterView>> {
    let pending = state
        .auth()
        .register_pending(&body.email, &body.name, &body.password)
        .await?;
    Ok(Json(RegisterView {
        success: true,
        status: "pending",
        email: pending.email.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginView {
    pub success: bool,
    pub user_id: UserId,
    pub email: String,
}

/// Log a host user in with email and password.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    client: ClientState,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginView>> {
    let user = state.auth().login(&body.email, &body.password).await?;
    let current = CurrentUser {
        id: user.id,
        email: user.email.clone(),
    };
    client.log_in(&current).await?;
    set_sentry_user(&user.id, Some(user.email.as_str()));
    tracing::info!(user_id = %user.id, "host user logged in");

    Ok(Json(LoginView {
        success: true,
        user_id: user.id,
        email: user.email.to_string(),
    }))
}
