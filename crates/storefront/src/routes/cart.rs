//! Cart route handlers.
//!
//! Cart handles live in host user metadata for logged-in users and in the
//! `shopify_cart_id` cookie otherwise. Shopify holds the cart itself.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::instrument;

use ec_relate_core::CartHandle;

use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::{CartCookie, CartCookieUpdate, OptionalAuth, RequireAuth, VerifiedNonce};
use crate::services::cart::{BindOutcome, CartCommand, CartLinesRequest, CartView};
use crate::services::client_state::ClientState;
use crate::services::identity::{CookieChange, IdentityContext, IdentityStore};
use crate::shopify::BuyerIdentity;
use crate::state::AppState;

fn cookie_update(state: &AppState, change: CookieChange) -> CartCookieUpdate {
    let config = state.config();
    CartCookieUpdate::new(change, config.cart.cookie_ttl, config.secure_cookies())
}

/// Reconcile the cart (`POST /api/v1/cart/lines`).
///
/// Runs the requested mode, then attaches the logged-in customer to the
/// cart if that has not happened yet. A failed attach is logged and does
/// not fail the request.
#[instrument(skip_all)]
pub async fn lines(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    client: ClientState,
    OptionalAuth(user): OptionalAuth,
    CartCookie(cookie): CartCookie,
    Json(body): Json<CartLinesRequest>,
) -> Result<(CartCookieUpdate, Json<CartView>)> {
    let user_id = user.as_ref().map(|u| u.id);
    if let Some(claimed) = body.claimed_user()?
        && Some(claimed) != user_id
    {
        tracing::warn!(claimed = %claimed, "cart request for another user");
        return Err(AppError::Forbidden(
            "wp_user_id does not match the logged-in user".to_string(),
        ));
    }

    let command = body.command()?;
    let buy_now = matches!(command, CartCommand::BuyNow(_));
    add_breadcrumb("cart", command.mode(), None);

    let ctx = IdentityContext {
        user_id,
        cookie_handle: cookie,
        browser: client.browser_key(),
    };
    let engine = state.cart_engine();
    let mut result = engine
        .reconcile(command, &ctx, body.requested_handle().as_ref())
        .await?;

    if !buy_now
        && let Err(e) = engine.bind_after_reconcile(&client, user_id, &mut result).await
    {
        tracing::warn!(error = %e, "automatic bind failed");
    }

    let view = CartView::from(&result);
    Ok((cookie_update(&state, result.cookie), Json(view)))
}

/// Bind request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    /// Defaults to the handle the user already owns.
    pub cart_id: Option<String>,
    /// Buyer the client already saw on the cart; skips the remote call.
    pub buyer_id: Option<BuyerIdentity>,
}

/// Bind response body.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindView {
    pub success: bool,
    pub cart_id: CartHandle,
    pub buyer_id: Option<BuyerIdentity>,
    pub performed: bool,
}

/// Attach the session's customer to a cart (`POST /api/v1/cart/bind`).
///
/// Refused with 403 until the validation gate has matched the customer to
/// the logged-in user.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn bind(
    State(state): State<AppState>,
    _nonce: VerifiedNonce,
    client: ClientState,
    RequireAuth(user): RequireAuth,
    CartCookie(cookie): CartCookie,
    Json(body): Json<BindRequest>,
) -> Result<(CartCookieUpdate, Json<BindView>)> {
    let requested = body
        .cart_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(CartHandle::parse)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let handle = match requested {
        Some(handle) => handle,
        None => {
            let ctx = IdentityContext {
                user_id: Some(user.id),
                cookie_handle: cookie,
                browser: None,
            };
            IdentityStore::new(state.meta())
                .resolve(&ctx, None)
                .await?
                .handle()
                .cloned()
                .ok_or_else(|| AppError::BadRequest("cartId is required".to_string()))?
        }
    };

    let token = client
        .customer_token()
        .await?
        .filter(|t| !t.is_expired())
        .ok_or_else(|| AppError::BadRequest("customer token is required".to_string()))?;

    let outcome: BindOutcome = state
        .cart_engine()
        .bind(
            &client,
            Some(user.id),
            &handle,
            &token.access_token,
            body.buyer_id.as_ref(),
        )
        .await?;

    let cart_id = outcome
        .cart
        .as_ref()
        .map_or_else(|| handle.clone(), |c| c.id.clone());
    let view = BindView {
        success: true,
        cart_id,
        buyer_id: outcome.buyer,
        performed: outcome.performed,
    };
    Ok((cookie_update(&state, outcome.cookie), Json(view)))
}
