//! Where a browser's cart handle lives.
//!
//! A handle is kept in exactly one place per identity context: the
//! `shopify_cart_id` cookie for anonymous visitors, or `user_meta` for host
//! users. The store never touches the cookie itself; it returns a
//! [`CookieChange`] that the HTTP layer applies to the response.

use ec_relate_core::{CartHandle, UserId};

use crate::db::{MetaKey, RepositoryError, UserMetaRepository};

/// Who owns the cart a request is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwnership {
    None,
    Anonymous(CartHandle),
    Bound { user_id: UserId, handle: CartHandle },
}

impl CartOwnership {
    #[must_use]
    pub const fn handle(&self) -> Option<&CartHandle> {
        match self {
            Self::None => None,
            Self::Anonymous(handle) | Self::Bound { handle, .. } => Some(handle),
        }
    }

    #[must_use]
    pub const fn is_bound(&self) -> bool {
        matches!(self, Self::Bound { .. })
    }
}

/// The request-side identity inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityContext {
    pub user_id: Option<UserId>,
    pub cookie_handle: Option<CartHandle>,
    /// Stable per-browser key, used to queue a visitor's first adds.
    pub browser: Option<String>,
}

/// What to do with the cart cookie after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CookieChange {
    #[default]
    Keep,
    Set(CartHandle),
    Clear,
}

impl CookieChange {
    /// Combine two changes; the later one wins unless it is `Keep`.
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        match next {
            Self::Keep => self,
            other => other,
        }
    }
}

/// Reads and writes cart handles for an identity context.
pub struct IdentityStore<'a> {
    meta: &'a dyn UserMetaRepository,
}

impl<'a> IdentityStore<'a> {
    #[must_use]
    pub const fn new(meta: &'a dyn UserMetaRepository) -> Self {
        Self { meta }
    }

    /// The user's bound handle from metadata.
    ///
    /// A value that does not parse as a cart handle is logged and ignored.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn bound_handle(&self, user_id: UserId) -> Result<Option<CartHandle>, RepositoryError> {
        let Some(raw) = self.meta.get(user_id, MetaKey::ShopifyCartId).await? else {
            return Ok(None);
        };
        match CartHandle::parse(&raw) {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "ignoring malformed stored cart handle");
                Ok(None)
            }
        }
    }

    /// Resolve ownership: bound metadata, then the cookie, then `requested`.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn resolve(
        &self,
        ctx: &IdentityContext,
        requested: Option<&CartHandle>,
    ) -> Result<CartOwnership, RepositoryError> {
        if let Some(user_id) = ctx.user_id
            && let Some(handle) = self.bound_handle(user_id).await?
        {
            return Ok(CartOwnership::Bound { user_id, handle });
        }

        Ok(ctx
            .cookie_handle
            .as_ref()
            .or(requested)
            .cloned()
            .map_or(CartOwnership::None, CartOwnership::Anonymous))
    }

    /// Store `handle` for the context: metadata for a user, else the cookie.
    ///
    /// A user's cookie copy of the same handle is cleared once the metadata
    /// holds it.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn persist(
        &self,
        ctx: &IdentityContext,
        handle: &CartHandle,
    ) -> Result<CookieChange, RepositoryError> {
        match ctx.user_id {
            Some(user_id) => {
                self.meta
                    .set(user_id, MetaKey::ShopifyCartId, handle.as_str())
                    .await?;
                if ctx.cookie_handle.as_ref() == Some(handle) {
                    Ok(CookieChange::Clear)
                } else {
                    Ok(CookieChange::Keep)
                }
            }
            None if ctx.cookie_handle.as_ref() == Some(handle) => Ok(CookieChange::Keep),
            None => Ok(CookieChange::Set(handle.clone())),
        }
    }

    /// Drop a handle the remote no longer recognizes.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn forget(
        &self,
        ctx: &IdentityContext,
        ownership: &CartOwnership,
    ) -> Result<CookieChange, RepositoryError> {
        match ownership {
            CartOwnership::Bound { user_id, .. } => {
                self.meta.delete(*user_id, MetaKey::ShopifyCartId).await?;
                Ok(CookieChange::Keep)
            }
            CartOwnership::Anonymous(handle) if ctx.cookie_handle.as_ref() == Some(handle) => {
                Ok(CookieChange::Clear)
            }
            _ => Ok(CookieChange::Keep),
        }
    }

    /// Move a handle to the user: metadata is written before the cookie is
    /// cleared, so a failure in between leaves the handle reachable.
    ///
    /// # Errors
    ///
    /// Propagates repository failures; the cookie is kept in that case.
    pub async fn transfer_to_user(
        &self,
        user_id: UserId,
        handle: &CartHandle,
    ) -> Result<CookieChange, RepositoryError> {
        self.meta
            .set(user_id, MetaKey::ShopifyCartId, handle.as_str())
            .await?;
        Ok(CookieChange::Clear)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;

    fn handle(tail: &str) -> CartHandle {
        CartHandle::parse(&format!("gid://shopify/Cart/{tail}")).unwrap()
    }

    #[tokio::test]
    async fn bound_handle_beats_cookie_and_request() {
        let db = MemoryDb::new();
        let user = UserId::new(7);
        db.set(user, MetaKey::ShopifyCartId, handle("meta").as_str())
            .await
            .unwrap();
        let store = IdentityStore::new(&db);

        let ctx = IdentityContext {
            user_id: Some(user),
            cookie_handle: Some(handle("cookie")),
            browser: None,
        };
        assert_eq!(
            store.resolve(&ctx, Some(&handle("req"))).await.unwrap(),
            CartOwnership::Bound {
                user_id: user,
                handle: handle("meta")
            }
        );
    }

    #[tokio::test]
    async fn cookie_beats_request_and_request_is_last_resort() {
        let db = MemoryDb::new();
        let store = IdentityStore::new(&db);

        let ctx = IdentityContext {
            user_id: None,
            cookie_handle: Some(handle("cookie")),
            browser: None,
        };
        assert_eq!(
            store.resolve(&ctx, Some(&handle("req"))).await.unwrap(),
            CartOwnership::Anonymous(handle("cookie"))
        );

        let empty = IdentityContext::default();
        assert_eq!(
            store.resolve(&empty, Some(&handle("req"))).await.unwrap(),
            CartOwnership::Anonymous(handle("req"))
        );
        assert_eq!(store.resolve(&empty, None).await.unwrap(), CartOwnership::None);
    }

    #[tokio::test]
    async fn persist_targets_one_location() {
        let db = MemoryDb::new();
        let store = IdentityStore::new(&db);

        let anon = IdentityContext::default();
        assert_eq!(
            store.persist(&anon, &handle("a")).await.unwrap(),
            CookieChange::Set(handle("a"))
        );
        assert_eq!(db.get(UserId::new(1), MetaKey::ShopifyCartId).await.unwrap(), None);

        let user = IdentityContext {
            user_id: Some(UserId::new(1)),
            cookie_handle: None,
            browser: None,
        };
        assert_eq!(store.persist(&user, &handle("b")).await.unwrap(), CookieChange::Keep);
        assert_eq!(
            store.bound_handle(UserId::new(1)).await.unwrap(),
            Some(handle("b"))
        );

        let adopting = IdentityContext {
            user_id: Some(UserId::new(1)),
            cookie_handle: Some(handle("c")),
            browser: None,
        };
        assert_eq!(store.persist(&adopting, &handle("c")).await.unwrap(), CookieChange::Clear);
        assert_eq!(
            store.bound_handle(UserId::new(1)).await.unwrap(),
            Some(handle("c"))
        );
    }

    #[tokio::test]
    async fn transfer_writes_meta_then_clears_cookie() {
        let db = MemoryDb::new();
        let store = IdentityStore::new(&db);
        let change = store.transfer_to_user(UserId::new(3), &handle("x")).await.unwrap();
        assert_eq!(change, CookieChange::Clear);
        assert_eq!(store.bound_handle(UserId::new(3)).await.unwrap(), Some(handle("x")));
    }

    #[tokio::test]
    async fn malformed_meta_is_ignored() {
        let db = MemoryDb::new();
        db.set(UserId::new(2), MetaKey::ShopifyCartId, "not-a-gid").await.unwrap();
        let store = IdentityStore::new(&db);
        assert_eq!(store.bound_handle(UserId::new(2)).await.unwrap(), None);
    }

    #[test]
    fn later_cookie_changes_win() {
        let set = CookieChange::Set(handle("a"));
        assert_eq!(set.clone().then(CookieChange::Keep), set);
        assert_eq!(set.then(CookieChange::Clear), CookieChange::Clear);
    }
}
