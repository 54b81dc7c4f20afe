//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::BridgeConfig;
use crate::db::{
    PendingUserRepository, PgPendingUserRepository, PgUserMetaRepository, PgUserRepository,
    UserMetaRepository, UserRepository,
};
use crate::services::auth::AuthService;
use crate::services::cart::CartEngine;
use crate::services::crypto::Signer;
use crate::services::mutation_guard::MutationGuard;
use crate::services::token_exchange::TokenExchange;
use crate::services::validation::ValidationGate;
use crate::shopify::{CommerceApi, CustomerClient, IdentityProvider, ShopifyError, StorefrontClient};

/// The collaborators a state is built from.
pub struct Parts {
    pub users: Arc<dyn UserRepository>,
    pub meta: Arc<dyn UserMetaRepository>,
    pub pending: Arc<dyn PendingUserRepository>,
    pub commerce: Arc<dyn CommerceApi>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Repositories and remote clients are held
/// behind their traits so tests can swap in the in-memory versions.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: BridgeConfig,
    pool: Option<PgPool>,
    users: Arc<dyn UserRepository>,
    meta: Arc<dyn UserMetaRepository>,
    pending: Arc<dyn PendingUserRepository>,
    commerce: Arc<dyn CommerceApi>,
    identity: Arc<dyn IdentityProvider>,
    guard: MutationGuard,
    signer: Signer,
}

impl AppState {
    /// Create the production state: `PostgreSQL` repositories and live
    /// Shopify clients.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: BridgeConfig, pool: PgPool) -> Result<Self, ShopifyError> {
        let timeout = config.cart.request_timeout;
        let parts = Parts {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            meta: Arc::new(PgUserMetaRepository::new(pool.clone())),
            pending: Arc::new(PgPendingUserRepository::new(pool.clone())),
            commerce: Arc::new(StorefrontClient::new(&config.shopify, timeout)?),
            identity: Arc::new(CustomerClient::new(&config.shopify, timeout)?),
        };
        Ok(Self::build(config, Some(pool), parts))
    }

    /// Create a state from explicit collaborators, without a database pool.
    #[must_use]
    pub fn from_parts(config: BridgeConfig, parts: Parts) -> Self {
        Self::build(config, None, parts)
    }

    fn build(config: BridgeConfig, pool: Option<PgPool>, parts: Parts) -> Self {
        let guard = MutationGuard::new(config.cart.request_timeout);
        let signer = Signer::new(config.session_secret.clone());
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                users: parts.users,
                meta: parts.meta,
                pending: parts.pending,
                commerce: parts.commerce,
                identity: parts.identity,
                guard,
                signer,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// The database pool, absent when running on in-memory repositories.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn signer(&self) -> &Signer {
        &self.inner.signer
    }

    #[must_use]
    pub fn identity_provider(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    #[must_use]
    pub fn meta(&self) -> &dyn UserMetaRepository {
        self.inner.meta.as_ref()
    }

    #[must_use]
    pub fn cart_engine(&self) -> CartEngine<'_> {
        CartEngine::new(
            self.inner.commerce.as_ref(),
            self.inner.meta.as_ref(),
            &self.inner.guard,
        )
    }

    #[must_use]
    pub fn validation_gate(&self) -> ValidationGate<'_> {
        ValidationGate::new(
            self.inner.identity.as_ref(),
            self.inner.meta.as_ref(),
            self.inner.pending.as_ref(),
        )
    }

    #[must_use]
    pub fn auth(&self) -> AuthService<'_> {
        AuthService::new(self.inner.users.as_ref(), self.inner.pending.as_ref())
    }

    /// Token exchange bound to this site's callback URL.
    #[must_use]
    pub fn token_exchange<'a>(&'a self, redirect_uri: &'a str) -> TokenExchange<'a> {
        TokenExchange::new(
            self.inner.identity.as_ref(),
            &self.inner.signer,
            redirect_uri,
            self.inner.config.cart.oauth_state_ttl,
        )
    }
}
