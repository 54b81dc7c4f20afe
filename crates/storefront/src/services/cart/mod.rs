//! Cart reconciliation.
//!
//! Given a [`CartCommand`] and the request's identity, decide which remote
//! cart the command applies to, run it, and work out where the resulting
//! handle must be stored. The remote cart is the only source of truth: item
//! counts and buyer identity always come from the cart the platform just
//! returned.
//!
//! # Flow
//!
//! 1. `BuyNow` short-circuits into a fresh cart that is never stored
//! 2. Ownership resolves to the bound handle, the cookie, or the request
//! 3. Without a handle, only `AddLine` reaches the platform
//! 4. Mutations queue per owner (user or browser), then per handle
//!    ([`MutationGuard`])
//! 5. The returned handle is persisted for the identity context

mod bind;
mod command;

pub use bind::BindOutcome;
pub use command::{CartCommand, CartLinesRequest, CommandError};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use ec_relate_core::CartHandle;

use crate::db::{RepositoryError, UserMetaRepository};
use crate::services::identity::{CartOwnership, CookieChange, IdentityContext, IdentityStore};
use crate::services::mutation_guard::{Busy, MutationGuard};
use crate::shopify::{BuyerIdentity, Cart, CartCost, CartLine, CartUserError, CommerceApi, ShopifyError};

#[derive(Debug, Error)]
pub enum CartError {
    /// The platform refused the change; messages are passed through.
    #[error("{}", .0.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; "))]
    Rejected(Vec<CartUserError>),

    /// The platform could not be reached or answered with nothing usable.
    #[error("cart unavailable: {0}")]
    Unavailable(ShopifyError),

    #[error(transparent)]
    Busy(#[from] Busy),

    /// The cart to bind no longer exists.
    #[error("cart not found")]
    NotFound,

    /// The session's customer has not been matched to the host user.
    #[error("customer is not confirmed for this user")]
    CustomerUnconfirmed,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl From<ShopifyError> for CartError {
    fn from(err: ShopifyError) -> Self {
        match err {
            ShopifyError::UserErrors(errors) => Self::Rejected(errors),
            ShopifyError::CartNotFound => Self::NotFound,
            other => Self::Unavailable(other),
        }
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// `None` is an empty cart, not a failure.
    pub cart: Option<Cart>,
    pub ownership: CartOwnership,
    pub cookie: CookieChange,
}

impl Reconciled {
    fn empty(cookie: CookieChange) -> Self {
        Self {
            cart: None,
            ownership: CartOwnership::None,
            cookie,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<&CartHandle> {
        self.cart.as_ref().map(|c| &c.id)
    }

    #[must_use]
    pub fn buyer(&self) -> Option<&BuyerIdentity> {
        self.cart.as_ref().and_then(|c| c.buyer.as_ref())
    }

    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.cart.as_ref().map_or(0, Cart::item_count)
    }
}

/// JSON body of a successful cart response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub success: bool,
    pub cart_id: Option<CartHandle>,
    pub buyer_id: Option<BuyerIdentity>,
    pub cart_contents: Vec<CartLine>,
    pub estimated_cost: Option<CartCost>,
    pub checkout_url: Option<String>,
    pub item_count: u64,
}

impl From<&Reconciled> for CartView {
    fn from(result: &Reconciled) -> Self {
        let cart = result.cart.as_ref();
        Self {
            success: true,
            cart_id: cart.map(|c| c.id.clone()),
            buyer_id: cart.and_then(|c| c.buyer.clone()),
            cart_contents: cart.map(|c| c.lines.clone()).unwrap_or_default(),
            estimated_cost: cart.map(|c| c.cost.clone()),
            checkout_url: cart.map(|c| c.checkout_url.clone()),
            item_count: result.item_count(),
        }
    }
}

/// Runs cart commands against the platform.
pub struct CartEngine<'a> {
    commerce: &'a dyn CommerceApi,
    meta: &'a dyn UserMetaRepository,
    guard: &'a MutationGuard,
}

impl<'a> CartEngine<'a> {
    #[must_use]
    pub const fn new(
        commerce: &'a dyn CommerceApi,
        meta: &'a dyn UserMetaRepository,
        guard: &'a MutationGuard,
    ) -> Self {
        Self {
            commerce,
            meta,
            guard,
        }
    }

    fn identity(&self) -> IdentityStore<'a> {
        IdentityStore::new(self.meta)
    }

    /// Run `command` for the request identity.
    ///
    /// `requested` is the client's `cartId`, used only when neither the
    /// user's metadata nor the cookie yields a handle.
    ///
    /// # Errors
    ///
    /// See [`CartError`]. On error nothing is persisted.
    #[instrument(skip_all, fields(mode = command.mode(), user_id = ?ctx.user_id))]
    pub async fn reconcile(
        &self,
        command: CartCommand,
        ctx: &IdentityContext,
        requested: Option<&CartHandle>,
    ) -> Result<Reconciled, CartError> {
        if let CartCommand::BuyNow(line) = command {
            let cart = self.commerce.create_cart(vec![line], None).await?;
            tracing::info!(cart_id = %cart.id, "created buy-now cart");
            return Ok(Reconciled {
                cart: Some(prune_empty_lines(cart)),
                ownership: CartOwnership::None,
                cookie: CookieChange::Keep,
            });
        }

        // Queue per owner first so two first-adds cannot each create a cart.
        let owner = owner_key(ctx);
        let _owner_guard = match &owner {
            Some(key) if command.is_mutation() => Some(self.guard.acquire(key).await?),
            _ => None,
        };

        let identity = self.identity();
        let mut ownership = identity.resolve(ctx, requested).await?;
        if ownership.handle().is_none()
            && ctx.user_id.is_none()
            && let Some(key) = &owner
            && let Some(recent) = self.guard.recent_cart(key).await
        {
            tracing::debug!(cart_id = %recent, "joining cart created by an earlier request");
            ownership = CartOwnership::Anonymous(recent);
        }

        let Some(handle) = ownership.handle().cloned() else {
            return match command {
                CartCommand::AddLine(line) => {
                    let cart = self.commerce.create_cart(vec![line], None).await?;
                    tracing::info!(cart_id = %cart.id, "created cart");
                    self.finish(ctx, cart, CookieChange::Keep).await
                }
                _ => Ok(Reconciled::empty(CookieChange::Keep)),
            };
        };

        let _cart_guard = if command.is_mutation() {
            Some(self.guard.acquire(handle.as_str()).await?)
        } else {
            None
        };

        let command = match command {
            CartCommand::Recalculate(lines) if lines.is_empty() => CartCommand::Read,
            other => other,
        };

        let outcome = match command {
            CartCommand::AddLine(line) => {
                match self.commerce.add_lines(&handle, vec![line.clone()]).await {
                    Err(ShopifyError::CartNotFound) => {
                        let cleared = identity.forget(ctx, &ownership).await?;
                        self.forget_recent(owner.as_deref()).await;
                        tracing::info!(stale = %handle, "cart expired, starting a new one");
                        let cart = self.commerce.create_cart(vec![line], None).await?;
                        return self.finish(ctx, cart, cleared).await;
                    }
                    other => other,
                }
            }
            CartCommand::RemoveLine(line_id) => {
                self.commerce.remove_lines(&handle, vec![line_id]).await
            }
            CartCommand::Recalculate(lines) => self.commerce.update_lines(&handle, lines).await,
            CartCommand::Read | CartCommand::BuyNow(_) => self
                .commerce
                .get_cart(&handle)
                .await
                .and_then(|cart| cart.ok_or(ShopifyError::CartNotFound)),
        };

        match outcome {
            Ok(cart) => self.finish(ctx, cart, CookieChange::Keep).await,
            Err(ShopifyError::CartNotFound) => {
                tracing::info!(stale = %handle, "stored cart no longer exists");
                let cookie = identity.forget(ctx, &ownership).await?;
                self.forget_recent(owner.as_deref()).await;
                Ok(Reconciled::empty(cookie))
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, cart_id = %handle, "cart call failed");
                }
                Err(e.into())
            }
        }
    }

    /// Persist the returned handle and shape the result.
    async fn finish(
        &self,
        ctx: &IdentityContext,
        cart: Cart,
        cookie: CookieChange,
    ) -> Result<Reconciled, CartError> {
        let change = self.identity().persist(ctx, &cart.id).await?;
        let ownership = match ctx.user_id {
            Some(user_id) => CartOwnership::Bound {
                user_id,
                handle: cart.id.clone(),
            },
            None => {
                if let Some(key) = owner_key(ctx) {
                    self.guard.remember_cart(&key, &cart.id).await;
                }
                CartOwnership::Anonymous(cart.id.clone())
            }
        };
        Ok(Reconciled {
            cart: Some(prune_empty_lines(cart)),
            ownership,
            cookie: cookie.then(change),
        })
    }

    async fn forget_recent(&self, owner: Option<&str>) {
        if let Some(key) = owner {
            self.guard.forget_cart(key).await;
        }
    }
}

/// Guard key for the cart owner: the host user, else the browser.
fn owner_key(ctx: &IdentityContext) -> Option<String> {
    match (ctx.user_id, &ctx.browser) {
        (Some(user_id), _) => Some(format!("user:{user_id}")),
        (None, Some(browser)) => Some(format!("browser:{browser}")),
        (None, None) => None,
    }
}

/// Lines at quantity zero are not shown, whatever the platform returned.
fn prune_empty_lines(mut cart: Cart) -> Cart {
    cart.lines.retain(|l| l.quantity > 0);
    cart
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use ec_relate_core::{LineId, MerchandiseId, Quantity, UserId};

    use super::*;
    use crate::db::MetaKey;
    use crate::db::memory::MemoryDb;
    use crate::shopify::memory::{InjectedFailure, MemoryCommerce};
    use crate::shopify::{CartLineInput, CartLineUpdate};

    struct Fixture {
        commerce: MemoryCommerce,
        db: MemoryDb,
        guard: MutationGuard,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                commerce: MemoryCommerce::new(),
                db: MemoryDb::new(),
                guard: MutationGuard::new(Duration::from_secs(1)),
            }
        }

        fn engine(&self) -> CartEngine<'_> {
            CartEngine::new(&self.commerce, &self.db, &self.guard)
        }
    }

    fn add(variant: u32, quantity: u32) -> CartCommand {
        CartCommand::AddLine(CartLineInput {
            merchandise_id: MerchandiseId::parse(&format!("gid://shopify/ProductVariant/{variant}"))
                .unwrap(),
            quantity: Quantity::new(quantity),
        })
    }

    fn anonymous(cookie: Option<&CartHandle>) -> IdentityContext {
        IdentityContext {
            user_id: None,
            cookie_handle: cookie.cloned(),
            browser: None,
        }
    }

    #[tokio::test]
    async fn first_add_creates_cart_and_sets_cookie() {
        let fx = Fixture::new();
        let result = fx.engine().reconcile(add(1, 2), &anonymous(None), None).await.unwrap();

        let handle = result.handle().unwrap().clone();
        assert_eq!(result.item_count(), 2);
        assert_eq!(result.cookie, CookieChange::Set(handle));
        assert_eq!(fx.commerce.count("create_cart"), 1);
    }

    #[tokio::test]
    async fn reads_without_a_handle_never_call_the_platform() {
        let fx = Fixture::new();
        let remove = CartCommand::RemoveLine(LineId::parse("gid://shopify/CartLine/x").unwrap());
        for command in [CartCommand::Read, remove, CartCommand::Recalculate(Vec::new())] {
            let result = fx.engine().reconcile(command, &anonymous(None), None).await.unwrap();
            assert!(result.cart.is_none());
            assert_eq!(result.item_count(), 0);
        }
        assert!(fx.commerce.calls().is_empty());
    }

    #[tokio::test]
    async fn item_count_tracks_the_remote_cart() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let first = engine.reconcile(add(1, 1), &anonymous(None), None).await.unwrap();
        let handle = first.handle().unwrap().clone();
        let ctx = anonymous(Some(&handle));

        let second = engine.reconcile(add(2, 3), &ctx, None).await.unwrap();
        assert_eq!(second.item_count(), 4);
        assert_eq!(second.cookie, CookieChange::Keep);

        let line = second.cart.as_ref().unwrap().lines[0].id.clone();
        let updated = engine
            .reconcile(
                CartCommand::Recalculate(vec![CartLineUpdate {
                    id: LineId::parse(&line).unwrap(),
                    quantity: Quantity::ZERO,
                }]),
                &ctx,
                None,
            )
            .await
            .unwrap();
        assert_eq!(updated.item_count(), 3);
        assert!(updated.cart.unwrap().lines.iter().all(|l| l.quantity > 0));
    }

    fn browser(key: &str) -> IdentityContext {
        IdentityContext {
            browser: Some(key.to_string()),
            ..IdentityContext::default()
        }
    }

    #[tokio::test]
    async fn concurrent_first_adds_share_one_cart() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let ctx = browser("b1");

        let (a, b) = tokio::join!(
            engine.reconcile(add(1, 1), &ctx, None),
            engine.reconcile(add(2, 1), &ctx, None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.handle(), b.handle());
        assert_eq!(fx.commerce.count("create_cart"), 1);
        assert_eq!(a.item_count().max(b.item_count()), 2);

        let handle = a.handle().unwrap().clone();
        let read = engine
            .reconcile(CartCommand::Read, &anonymous(Some(&handle)), None)
            .await
            .unwrap();
        assert_eq!(read.item_count(), 2);
    }

    #[tokio::test]
    async fn separate_browsers_get_separate_carts() {
        let fx = Fixture::new();
        let engine = fx.engine();

        let (ctx1, ctx2) = (browser("b1"), browser("b2"));
        let (a, b) = tokio::join!(
            engine.reconcile(add(1, 1), &ctx1, None),
            engine.reconcile(add(1, 1), &ctx2, None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.handle(), b.handle());
        assert_eq!(fx.commerce.count("create_cart"), 2);
    }

    #[tokio::test]
    async fn buy_now_is_isolated_and_never_persisted() {
        let fx = Fixture::new();
        let user = UserId::new(4);
        let existing = CartHandle::parse("gid://shopify/Cart/existing").unwrap();
        fx.db.set(user, MetaKey::ShopifyCartId, existing.as_str()).await.unwrap();

        let ctx = IdentityContext {
            user_id: Some(user),
            cookie_handle: Some(existing.clone()),
            browser: None,
        };
        let buy = match add(9, 1) {
            CartCommand::AddLine(line) => CartCommand::BuyNow(line),
            other => other,
        };
        let result = fx.engine().reconcile(buy, &ctx, None).await.unwrap();

        assert_ne!(result.handle(), Some(&existing));
        assert_eq!(result.cookie, CookieChange::Keep);
        assert_eq!(
            fx.db.get(user, MetaKey::ShopifyCartId).await.unwrap().as_deref(),
            Some(existing.as_str())
        );
        assert_eq!(fx.commerce.calls(), vec!["create_cart"]);
    }

    #[tokio::test]
    async fn logged_in_results_go_to_user_meta() {
        let fx = Fixture::new();
        let user = UserId::new(1);
        let ctx = IdentityContext {
            user_id: Some(user),
            cookie_handle: None,
            browser: None,
        };
        let result = fx.engine().reconcile(add(1, 1), &ctx, None).await.unwrap();

        assert_eq!(result.cookie, CookieChange::Keep);
        assert!(result.ownership.is_bound());
        assert_eq!(
            fx.db.get(user, MetaKey::ShopifyCartId).await.unwrap().as_deref(),
            result.handle().map(CartHandle::as_str)
        );
    }

    #[tokio::test]
    async fn remote_failures_are_typed_and_leave_state_alone() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let first = engine.reconcile(add(1, 1), &anonymous(None), None).await.unwrap();
        let ctx = anonymous(first.handle());

        fx.commerce.fail_next(InjectedFailure::Timeout);
        let err = engine.reconcile(add(2, 1), &ctx, None).await.unwrap_err();
        assert!(matches!(err, CartError::Unavailable(ShopifyError::Timeout)));

        fx.commerce.fail_next(InjectedFailure::UserError("Only 2 left".to_string()));
        let err = engine.reconcile(add(2, 5), &ctx, None).await.unwrap_err();
        assert!(matches!(err, CartError::Rejected(_)));
        assert_eq!(err.to_string(), "Only 2 left");

        let read = engine.reconcile(CartCommand::Read, &ctx, None).await.unwrap();
        assert_eq!(read.item_count(), 1);
    }

    #[tokio::test]
    async fn expired_cart_is_forgotten_or_replaced() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let first = engine.reconcile(add(1, 1), &anonymous(None), None).await.unwrap();
        let stale = first.handle().unwrap().clone();
        fx.commerce.expire(&stale);
        let ctx = anonymous(Some(&stale));

        let read = engine.reconcile(CartCommand::Read, &ctx, None).await.unwrap();
        assert!(read.cart.is_none());
        assert_eq!(read.cookie, CookieChange::Clear);

        let added = engine.reconcile(add(2, 1), &ctx, None).await.unwrap();
        let fresh = added.handle().unwrap().clone();
        assert_ne!(fresh, stale);
        assert_eq!(added.cookie, CookieChange::Set(fresh));
    }

    #[tokio::test]
    async fn bound_handle_wins_over_cookie() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let user = UserId::new(2);
        let bound = engine
            .reconcile(add(1, 2), &IdentityContext { user_id: Some(user), ..IdentityContext::default() }, None)
            .await
            .unwrap();
        let cookie = engine.reconcile(add(3, 5), &anonymous(None), None).await.unwrap();

        let ctx = IdentityContext {
            user_id: Some(user),
            cookie_handle: cookie.handle().cloned(),
            browser: None,
        };
        let read = engine.reconcile(CartCommand::Read, &ctx, None).await.unwrap();
        assert_eq!(read.handle(), bound.handle());
        assert_eq!(read.item_count(), 2);
    }
}
