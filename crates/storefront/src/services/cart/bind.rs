//! Attaching a customer to a cart.
//!
//! A bind runs at most once per (cart, login). It is skipped without any
//! remote call when the cart already reports a buyer, or when this session
//! has already bound the same cart with the same token.
//!
//! With a host user, the customer must first have been matched to that user
//! by the validation gate. Until then the customer stays anonymous to them.

use tracing::instrument;

use ec_relate_core::{CartHandle, UserId};

use super::{CartEngine, CartError, Reconciled};
use crate::services::client_state::{BindRecord, ClientState};
use crate::services::identity::{CartOwnership, CookieChange};
use crate::shopify::{BuyerIdentity, Cart};

/// What a bind did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindOutcome {
    pub buyer: Option<BuyerIdentity>,
    /// Whether the platform was called.
    pub performed: bool,
    /// The cart after binding, when the platform was called.
    pub cart: Option<Cart>,
    pub cookie: CookieChange,
}

impl CartEngine<'_> {
    /// Attach the customer behind `access_token` to `handle`.
    ///
    /// With a host user, the handle is written to their metadata before the
    /// anonymous cookie is cleared.
    ///
    /// # Errors
    ///
    /// [`CartError::CustomerUnconfirmed`] when the gate has not matched the
    /// token to `user_id`, [`CartError::NotFound`] when the cart is gone,
    /// otherwise the usual platform and storage failures.
    #[instrument(skip_all, fields(cart_id = %handle, user_id = ?user_id))]
    pub async fn bind(
        &self,
        client: &ClientState,
        user_id: Option<UserId>,
        handle: &CartHandle,
        access_token: &str,
        known_buyer: Option<&BuyerIdentity>,
    ) -> Result<BindOutcome, CartError> {
        if let Some(user_id) = user_id
            && !client.customer_confirmed(user_id, access_token).await?
        {
            tracing::info!("customer not matched to host user, refusing bind");
            return Err(CartError::CustomerUnconfirmed);
        }
        if let Some(buyer) = known_buyer {
            tracing::debug!("cart already has a buyer, skipping bind");
            return Ok(BindOutcome {
                buyer: Some(buyer.clone()),
                ..BindOutcome::default()
            });
        }
        if client
            .last_bind()
            .await?
            .is_some_and(|record| record.covers(handle, access_token))
        {
            tracing::debug!("cart already bound in this session, skipping bind");
            return Ok(BindOutcome::default());
        }

        let _guard = self.guard.acquire(handle.as_str()).await?;
        let cart = self
            .commerce
            .update_buyer_identity(handle, access_token)
            .await?;
        client
            .record_bind(&BindRecord::new(cart.id.clone(), access_token))
            .await?;

        let cookie = match user_id {
            Some(user_id) => self.identity().transfer_to_user(user_id, &cart.id).await?,
            None if &cart.id != handle => CookieChange::Set(cart.id.clone()),
            None => CookieChange::Keep,
        };
        tracing::info!(bound_to = %cart.id, "buyer identity attached");

        Ok(BindOutcome {
            buyer: cart.buyer.clone(),
            performed: true,
            cart: Some(cart),
            cookie,
        })
    }

    /// Bind after a reconciliation when a host user holds a live customer
    /// token the gate matched to them, and the returned cart has no buyer yet.
    ///
    /// Updates `result` in place so the response reflects the bound cart.
    ///
    /// # Errors
    ///
    /// Propagates bind failures; `result` is untouched in that case.
    pub async fn bind_after_reconcile(
        &self,
        client: &ClientState,
        user_id: Option<UserId>,
        result: &mut Reconciled,
    ) -> Result<bool, CartError> {
        let Some(user_id) = user_id else {
            return Ok(false);
        };
        let Some(handle) = result.handle().cloned() else {
            return Ok(false);
        };
        let Some(token) = client.customer_token().await?.filter(|t| !t.is_expired()) else {
            return Ok(false);
        };
        if !client.customer_confirmed(user_id, &token.access_token).await? {
            tracing::debug!("customer not matched to host user, skipping bind");
            return Ok(false);
        }

        let known = result.buyer().cloned();
        let outcome = self
            .bind(client, Some(user_id), &handle, &token.access_token, known.as_ref())
            .await?;
        if !outcome.performed {
            return Ok(false);
        }

        if let Some(mut cart) = outcome.cart {
            cart.lines.retain(|l| l.quantity > 0);
            result.ownership = CartOwnership::Bound {
                user_id,
                handle: cart.id.clone(),
            };
            result.cart = Some(cart);
        }
        result.cookie = std::mem::take(&mut result.cookie).then(outcome.cookie);
        Ok(true)
    }
}
