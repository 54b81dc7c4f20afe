//! The customer validation gate.
//!
//! Runs on every page load that shows cart or customer UI, before any cart
//! reconciliation. It decides whether the stored customer token belongs to
//! the logged-in host user, and promotes a pending registration when the
//! identity provider confirms its email.

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use ec_relate_core::{CartHandle, Email, UserId};

use crate::db::{MetaKey, PendingUserRepository, RepositoryError, UserMetaRepository};
use crate::models::CurrentUser;
use crate::services::client_state::ClientState;
use crate::services::identity::IdentityStore;
use crate::shopify::{Customer, CustomerAccessToken, IdentityProvider};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

/// Result of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// No customer-scoped data may be shown.
    Anonymous,
    /// The token's customer is the logged-in host user.
    Bound {
        user_id: UserId,
        customer_id: String,
        cart: Option<CartHandle>,
    },
    /// A pending registration became a real user who is now logged in.
    Promoted { user: CurrentUser, customer_id: String },
}

/// JSON body for the gate endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateView {
    pub success: bool,
    pub status: &'static str,
    pub customer_id: Option<String>,
    pub cart_id: Option<CartHandle>,
    /// The client should reload to pick up the new host session.
    pub reload: bool,
}

impl From<&GateOutcome> for GateView {
    fn from(outcome: &GateOutcome) -> Self {
        match outcome {
            GateOutcome::Anonymous => Self {
                success: true,
                status: "anonymous",
                customer_id: None,
                cart_id: None,
                reload: false,
            },
            GateOutcome::Bound {
                customer_id, cart, ..
            } => Self {
                success: true,
                status: "bound",
                customer_id: Some(customer_id.clone()),
                cart_id: cart.clone(),
                reload: false,
            },
            GateOutcome::Promoted { customer_id, .. } => Self {
                success: true,
                status: "promoted",
                customer_id: Some(customer_id.clone()),
                cart_id: None,
                reload: true,
            },
        }
    }
}

pub struct ValidationGate<'a> {
    identity: &'a dyn IdentityProvider,
    meta: &'a dyn UserMetaRepository,
    pending: &'a dyn PendingUserRepository,
}

impl<'a> ValidationGate<'a> {
    #[must_use]
    pub const fn new(
        identity: &'a dyn IdentityProvider,
        meta: &'a dyn UserMetaRepository,
        pending: &'a dyn PendingUserRepository,
    ) -> Self {
        Self {
            identity,
            meta,
            pending,
        }
    }

    /// Run the gate for one browser.
    ///
    /// Provider failures never surface as errors: the visitor is treated as
    /// anonymous, and the token is dropped unless the failure was transient.
    ///
    /// # Errors
    ///
    /// Only storage failures are returned.
    #[instrument(skip_all)]
    pub async fn run(&self, client: &ClientState) -> Result<GateOutcome, GateError> {
        let Some(token) = client.customer_token().await? else {
            return Ok(GateOutcome::Anonymous);
        };
        let Some(token) = self.live_token(client, token).await? else {
            return Ok(GateOutcome::Anonymous);
        };

        let customer = match self.identity.current_customer(&token.access_token).await {
            Ok(customer) => customer,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "customer lookup failed, treating as anonymous");
                return Ok(GateOutcome::Anonymous);
            }
            Err(e) => {
                tracing::info!(error = %e, "customer token rejected, discarding");
                client.clear_customer_token().await?;
                return Ok(GateOutcome::Anonymous);
            }
        };
        let Some(email) = customer_email(&customer) else {
            tracing::warn!(customer_id = %customer.id, "customer has no usable email");
            return Ok(GateOutcome::Anonymous);
        };

        match client.current_user().await? {
            Some(user) if user.email.matches(&email) => {
                self.meta
                    .set(user.id, MetaKey::ShopifyCustomerId, &customer.id)
                    .await?;
                client
                    .confirm_customer(user.id, &customer.id, &token.access_token)
                    .await?;
                let cart = IdentityStore::new(self.meta).bound_handle(user.id).await?;
                Ok(GateOutcome::Bound {
                    user_id: user.id,
                    customer_id: customer.id,
                    cart,
                })
            }
            Some(user) => {
                tracing::info!(user_id = %user.id, "customer email does not match host user");
                client.forget_customer_match().await?;
                Ok(GateOutcome::Anonymous)
            }
            None => self.promote(client, &email, customer, &token).await,
        }
    }

    /// Return a usable token, refreshing an expired one.
    async fn live_token(
        &self,
        client: &ClientState,
        token: CustomerAccessToken,
    ) -> Result<Option<CustomerAccessToken>, GateError> {
        if !token.is_expired() {
            return Ok(Some(token));
        }
        let refreshed = match token.refresh_token.as_deref() {
            Some(refresh) => self.identity.refresh_token(refresh).await.ok(),
            None => None,
        };
        match refreshed {
            Some(fresh) => {
                tracing::debug!("customer token refreshed");
                client.set_customer_token(&fresh).await?;
                Ok(Some(fresh))
            }
            None => {
                tracing::info!("customer token expired and could not be refreshed");
                client.clear_customer_token().await?;
                Ok(None)
            }
        }
    }

    async fn promote(
        &self,
        client: &ClientState,
        email: &Email,
        customer: Customer,
        token: &CustomerAccessToken,
    ) -> Result<GateOutcome, GateError> {
        let Some(pending) = self.pending.find_unused_by_email(email).await? else {
            return Ok(GateOutcome::Anonymous);
        };
        let Some(user) = self.pending.promote(pending.id, &customer.id).await? else {
            tracing::info!(pending_id = %pending.id, "pending user already promoted elsewhere");
            return Ok(GateOutcome::Anonymous);
        };

        self.meta
            .set(user.id, MetaKey::ShopifyCustomerId, &customer.id)
            .await?;
        let current = CurrentUser {
            id: user.id,
            email: user.email,
        };
        client.log_in(&current).await?;
        client
            .confirm_customer(current.id, &customer.id, &token.access_token)
            .await?;
        tracing::info!(user_id = %current.id, "pending user promoted");

        Ok(GateOutcome::Promoted {
            user: current,
            customer_id: customer.id,
        })
    }
}

fn customer_email(customer: &Customer) -> Option<Email> {
    customer.email().and_then(|raw| Email::parse(raw).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tower_sessions::{MemoryStore, Session};

    use super::*;
    use crate::db::UserRepository;
    use crate::db::memory::MemoryDb;
    use crate::models::NewPendingUser;
    use crate::shopify::memory::MemoryIdentity;

    fn client() -> ClientState {
        ClientState::new(Session::new(None, Arc::new(MemoryStore::default()), None))
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    async fn pending(db: &MemoryDb, address: &str) {
        PendingUserRepository::create(
            db,
            NewPendingUser {
                email: email(address),
                name: "Pat".to_string(),
                password_hash: "$argon2id$stub".to_string(),
                issued_token: "t".to_string(),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn no_token_is_anonymous_without_provider_calls() {
        let identity = MemoryIdentity::new();
        let db = MemoryDb::new();
        let gate = ValidationGate::new(&identity, &db, &db);

        assert_eq!(gate.run(&client()).await.unwrap(), GateOutcome::Anonymous);
        assert_eq!(identity.count("current_customer"), 0);
    }

    #[tokio::test]
    async fn matching_email_binds_case_insensitively() {
        let identity = MemoryIdentity::new();
        identity.register_customer("tok", "gid://shopify/Customer/5", "Pat@Example.com");
        let db = MemoryDb::new();
        let user = UserRepository::create(&db, &email("pat@example.com"), "Pat", "h")
            .await
            .unwrap();
        db.set(user.id, MetaKey::ShopifyCartId, "gid://shopify/Cart/c9")
            .await
            .unwrap();

        let client = client();
        client.set_customer_token(&MemoryIdentity::token("tok")).await.unwrap();
        client
            .log_in(&CurrentUser {
                id: user.id,
                email: user.email.clone(),
            })
            .await
            .unwrap();

        let outcome = ValidationGate::new(&identity, &db, &db).run(&client).await.unwrap();
        let GateOutcome::Bound { cart, customer_id, .. } = outcome else {
            panic!("expected Bound, got {outcome:?}");
        };
        assert_eq!(customer_id, "gid://shopify/Customer/5");
        assert_eq!(cart.unwrap().as_str(), "gid://shopify/Cart/c9");
        assert!(client.customer_confirmed(user.id, "tok").await.unwrap());
        assert_eq!(
            db.get(user.id, MetaKey::ShopifyCustomerId).await.unwrap().as_deref(),
            Some("gid://shopify/Customer/5")
        );
    }

    #[tokio::test]
    async fn mismatched_email_exposes_nothing() {
        let identity = MemoryIdentity::new();
        identity.register_customer("tok", "gid://shopify/Customer/5", "other@example.com");
        let db = MemoryDb::new();
        let user = UserRepository::create(&db, &email("pat@example.com"), "Pat", "h")
            .await
            .unwrap();

        let client = client();
        client.set_customer_token(&MemoryIdentity::token("tok")).await.unwrap();
        client
            .log_in(&CurrentUser {
                id: user.id,
                email: user.email,
            })
            .await
            .unwrap();

        let outcome = ValidationGate::new(&identity, &db, &db).run(&client).await.unwrap();
        assert_eq!(outcome, GateOutcome::Anonymous);
        assert_eq!(db.get(user.id, MetaKey::ShopifyCustomerId).await.unwrap(), None);
        assert!(!client.customer_confirmed(user.id, "tok").await.unwrap());
    }

    #[tokio::test]
    async fn pending_user_is_promoted_once() {
        let identity = MemoryIdentity::new();
        identity.register_customer("tok", "gid://shopify/Customer/8", "new@example.com");
        let db = MemoryDb::new();
        pending(&db, "new@example.com").await;
        let gate = ValidationGate::new(&identity, &db, &db);

        let first = client();
        first.set_customer_token(&MemoryIdentity::token("tok")).await.unwrap();
        let outcome = gate.run(&first).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Promoted { .. }));
        assert!(GateView::from(&outcome).reload);
        let promoted = first.current_user().await.unwrap().unwrap();
        assert!(first.customer_confirmed(promoted.id, "tok").await.unwrap());

        // A second browser with the same customer finds nothing to promote.
        let second = client();
        second.set_customer_token(&MemoryIdentity::token("tok")).await.unwrap();
        assert_eq!(gate.run(&second).await.unwrap(), GateOutcome::Anonymous);
        assert_eq!(db.user_count(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_or_discarded() {
        let identity = MemoryIdentity::new();
        identity.register_customer("fresh", "gid://shopify/Customer/1", "x@example.com");
        identity.register_refresh("r1", MemoryIdentity::token("fresh"));
        let db = MemoryDb::new();
        let gate = ValidationGate::new(&identity, &db, &db);

        let expired = |refresh: &str| CustomerAccessToken {
            access_token: "old".to_string(),
            id_token: None,
            refresh_token: Some(refresh.to_string()),
            expires_in: Some(3600),
            obtained_at: 0,
        };

        let client_a = client();
        client_a.set_customer_token(&expired("r1")).await.unwrap();
        gate.run(&client_a).await.unwrap();
        assert_eq!(client_a.customer_token().await.unwrap().unwrap().access_token, "fresh");

        let client_b = client();
        client_b.set_customer_token(&expired("unknown")).await.unwrap();
        assert_eq!(gate.run(&client_b).await.unwrap(), GateOutcome::Anonymous);
        assert!(client_b.customer_token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_token_is_discarded() {
        let identity = MemoryIdentity::new();
        let db = MemoryDb::new();
        let client = client();
        client.set_customer_token(&MemoryIdentity::token("revoked")).await.unwrap();

        let outcome = ValidationGate::new(&identity, &db, &db).run(&client).await.unwrap();
        assert_eq!(outcome, GateOutcome::Anonymous);
        assert!(client.customer_token().await.unwrap().is_none());
    }
}
