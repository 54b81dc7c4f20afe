//! Browser-facing OAuth and logout route handlers.
//!
//! - Login: starts a PKCE login and redirects to the identity provider
//! - Callback: finishes the exchange and returns to the page the login began on
//! - Logout: verifies a signed host logout link, flushes the session and
//!   passes through the provider's logout
//! - Logout complete: residual cleanup, then back to the return URL

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use crate::error::clear_sentry_user;
use crate::middleware::{CartCookie, CartCookieUpdate, OptionalAuth};
use crate::services::client_state::ClientState;
use crate::services::identity::CookieChange;
use crate::services::token_exchange::{LogoutLink, sanitize_return_url};
use crate::state::AppState;

use super::customer::bind_after_login;

/// Query parameters for starting a login.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Relative path to come back to after login.
    pub return_to: Option<String>,
}

/// Query parameters from the provider's OAuth callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Error code if authorization failed.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Query parameters of the logout completion page.
#[derive(Debug, Default, Deserialize)]
pub struct CompleteQuery {
    pub return_to: Option<String>,
}

fn cookie_update(state: &AppState, change: CookieChange) -> CartCookieUpdate {
    let config = state.config();
    CartCookieUpdate::new(change, config.cart.cookie_ttl, config.secure_cookies())
}

/// Initiate a customer login.
///
/// # Route
///
/// `GET /auth/shopify/login`
pub async fn login(
    State(state): State<AppState>,
    client: ClientState,
    Query(query): Query<LoginQuery>,
) -> Response {
    let redirect_uri = state.config().oauth_redirect_uri();
    let return_to = query.return_to.as_deref().unwrap_or("/");

    match state.token_exchange(&redirect_uri).begin(&client, return_to).await {
        Ok(auth_url) => Redirect::to(&auth_url).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to start customer login");
            Redirect::to("/?login_error=session").into_response()
        }
    }
}

/// Handle the provider's OAuth callback.
///
/// The exchange fully completes, including the purge of the one-time
/// login state, before the browser is redirected anywhere.
///
/// # Route
///
/// `GET /auth/shopify/callback`
pub async fn callback(
    State(state): State<AppState>,
    client: ClientState,
    OptionalAuth(user): OptionalAuth,
    CartCookie(cookie): CartCookie,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        tracing::warn!(%error, %description, "customer login denied by provider");
        // Drop the pending login so the state cannot be reused.
        if let Err(e) = client.take_pending_login().await {
            tracing::warn!(error = %e, "failed to clear pending login");
        }
        return Redirect::to("/?login_error=denied").into_response();
    }

    let redirect_uri = state.config().oauth_redirect_uri();
    let completed = match state
        .token_exchange(&redirect_uri)
        .complete(
            &client,
            query.code.as_deref().unwrap_or_default(),
            query.state.as_deref().unwrap_or_default(),
        )
        .await
    {
        Ok(completed) => completed,
        Err(e) if e.is_validation() => {
            return Redirect::to("/?login_error=invalid_state").into_response();
        }
        Err(_) => return Redirect::to("/?login_error=token_exchange").into_response(),
    };

    let user_id = user.map(|u| u.id);
    let (change, _, _) =
        bind_after_login(&state, &client, user_id, cookie, &completed.token).await;

    (
        cookie_update(&state, change),
        Redirect::to(&completed.return_url),
    )
        .into_response()
}

/// Signed host logout.
///
/// Flushes the whole session (host user, customer tokens, client state),
/// clears the cart cookie and, when an id token was held, ends the
/// provider session before landing on the completion page.
///
/// # Route
///
/// `GET /auth/logout?return_to=..&expires=..&sig=..`
pub async fn logout(
    State(state): State<AppState>,
    client: ClientState,
    Query(link): Query<LogoutLink>,
) -> Response {
    if let Err(e) = link.verify(state.signer(), chrono::Utc::now().timestamp()) {
        tracing::warn!(error = %e, "rejected host logout link");
        return Redirect::to("/?logout_error=invalid_link").into_response();
    }

    let id_token = match client.customer_token().await {
        Ok(token) => token.and_then(|t| t.id_token),
        Err(e) => {
            tracing::warn!(error = %e, "could not read customer token during logout");
            None
        }
    };

    if let Err(e) = client.flush().await {
        tracing::error!(error = %e, "failed to flush session on logout");
    }
    clear_sentry_user();
    tracing::info!("host session logged out");

    let complete = state.config().absolute_url(&format!(
        "/auth/logout/complete?return_to={}",
        urlencoding::encode(&link.return_to)
    ));
    let target = match id_token {
        Some(id_token) => state.identity_provider().logout_url(&id_token, &complete),
        None => complete,
    };

    (
        cookie_update(&state, CookieChange::Clear),
        Redirect::to(&target),
    )
        .into_response()
}

/// Residual cleanup after logout, then back to the return URL with
/// `logoutCompleted=1`.
///
/// # Route
///
/// `GET /auth/logout/complete`
pub async fn logout_complete(
    State(state): State<AppState>,
    client: ClientState,
    Query(query): Query<CompleteQuery>,
) -> Response {
    if let Err(e) = client.flush().await {
        tracing::warn!(error = %e, "failed to flush session after logout");
    }

    let target = logout_completed_url(query.return_to.as_deref().unwrap_or("/"));
    (
        cookie_update(&state, CookieChange::Clear),
        Redirect::to(&target),
    )
        .into_response()
}

fn logout_completed_url(return_to: &str) -> String {
    let path = sanitize_return_url(return_to);
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}logoutCompleted=1")
}
