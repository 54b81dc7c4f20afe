//! Shopify Storefront and Customer Account API clients.
//!
//! # Architecture
//!
//! - Hand-written GraphQL documents posted with `reqwest`
//! - Shopify is the source of truth for carts - NO local copy is kept
//! - Both clients sit behind traits ([`CommerceApi`], [`IdentityProvider`]) so
//!   the cart and identity services can be exercised without the network
//!
//! # APIs
//!
//! ## Storefront API
//! - Cart create/read/line mutations and buyer identity updates
//! - Private access token, server-side only
//!
//! ## Customer Account API
//! - OAuth 2.0 authorization code flow with PKCE
//! - "Who am I" customer query used by the validation gate

mod customer;
pub mod memory;
mod storefront;
pub mod types;

pub use customer::{Customer, CustomerAccessToken, CustomerClient, EmailAddress};
pub use storefront::StorefrontClient;
pub use types::*;

use async_trait::async_trait;
use ec_relate_core::{CartHandle, LineId};
use thiserror::Error;

/// Errors that can occur when interacting with Shopify APIs.
#[derive(Debug, Error)]
pub enum ShopifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The response was well formed but carried no payload where one is required.
    #[error("Missing data: {0}")]
    MissingData(&'static str),

    /// The referenced cart no longer exists (expired or completed).
    #[error("Cart not found")]
    CartNotFound,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Business-rule rejection from a cart mutation, messages verbatim.
    #[error("{}", join_user_errors(.0))]
    UserErrors(Vec<CartUserError>),

    /// OAuth or Customer Account API failure.
    #[error("OAuth error: {0}")]
    OAuth(String),
}

impl ShopifyError {
    /// Whether retrying the same request later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Timeout
                | Self::GraphQL(_)
                | Self::Parse(_)
                | Self::MissingData(_)
                | Self::RateLimited(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

/// A GraphQL error returned by the Shopify API.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<serde_json::Value>,
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    if errors.is_empty() {
        return "(no error details provided)".to_string();
    }

    errors
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mut parts = Vec::new();
            if !e.message.is_empty() {
                parts.push(e.message.clone());
            }
            if !e.path.is_empty() {
                let path_str = e
                    .path
                    .iter()
                    .map(|p| match p {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(".");
                parts.push(format!("path: {path_str}"));
            }

            if parts.is_empty() {
                format!("[error {}]: (no details)", i + 1)
            } else {
                parts.join(" ")
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_user_errors(errors: &[CartUserError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cart operations against the commerce platform.
///
/// Every mutation returns the full cart after the change; callers must
/// replace any stored handle with `cart.id`.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// Create a cart, optionally pre-attached to a customer.
    async fn create_cart(
        &self,
        lines: Vec<CartLineInput>,
        customer_access_token: Option<&str>,
    ) -> Result<Cart, ShopifyError>;

    /// Fetch a cart. `Ok(None)` means the handle no longer resolves.
    async fn get_cart(&self, cart: &CartHandle) -> Result<Option<Cart>, ShopifyError>;

    async fn add_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineInput>,
    ) -> Result<Cart, ShopifyError>;

    async fn update_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineUpdate>,
    ) -> Result<Cart, ShopifyError>;

    async fn remove_lines(
        &self,
        cart: &CartHandle,
        line_ids: Vec<LineId>,
    ) -> Result<Cart, ShopifyError>;

    /// Attach the customer behind `customer_access_token` as the cart's buyer.
    async fn update_buyer_identity(
        &self,
        cart: &CartHandle,
        customer_access_token: &str,
    ) -> Result<Cart, ShopifyError>;
}

/// OAuth identity provider for commerce customers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization URL for the browser redirect, using an S256 PKCE challenge.
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        code_challenge: &str,
    ) -> String;

    /// Provider-side logout URL (ends the provider session too).
    fn logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CustomerAccessToken, ShopifyError>;

    async fn refresh_token(&self, refresh_token: &str)
    -> Result<CustomerAccessToken, ShopifyError>;

    /// The customer the access token belongs to.
    async fn current_customer(&self, access_token: &str) -> Result<Customer, ShopifyError>;
}
