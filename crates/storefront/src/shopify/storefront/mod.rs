//! Shopify Storefront API client implementation.
//!
//! Posts hand-written GraphQL documents with `reqwest`. Every call is bounded
//! by the configured request timeout; a timeout surfaces as
//! [`ShopifyError::Timeout`] so callers can report a retryable failure.

mod conversions;
mod queries;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ec_relate_core::{CartHandle, LineId};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::instrument;

use crate::config::ShopifyConfig;
use crate::shopify::types::{Cart, CartLineInput, CartLineUpdate};
use crate::shopify::{CommerceApi, GraphQLError, ShopifyError};

use conversions::{RawCart, RawMutationPayload, convert_cart};

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

/// Client for the Shopify Storefront API.
#[derive(Clone)]
pub struct StorefrontClient {
    inner: Arc<StorefrontClientInner>,
}

struct StorefrontClientInner {
    client: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
}

impl StorefrontClient {
    /// Create a new Storefront API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialization failure).
    pub fn new(config: &ShopifyConfig, timeout: Duration) -> Result<Self, ShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ec-relate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let endpoint = format!(
            "https://{}/api/{}/graphql.json",
            config.store, config.api_version
        );

        Ok(Self {
            inner: Arc::new(StorefrontClientInner {
                client,
                endpoint,
                access_token: config.storefront_token.clone(),
            }),
        })
    }

    /// Execute a GraphQL document and return its `data` object.
    async fn execute<T: DeserializeOwned>(
        &self,
        query: String,
        variables: serde_json::Value,
    ) -> Result<T, ShopifyError> {
        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            // Private access tokens use a different header than public tokens
            .header(
                "Shopify-Storefront-Private-Token",
                self.inner.access_token.expose_secret(),
            )
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(ShopifyError::from_reqwest)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ShopifyError::RateLimited(retry_after));
        }

        // Read as text first for better error diagnostics
        let body = response.text().await.map_err(ShopifyError::from_reqwest)?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Shopify API returned non-success status"
            );
            return Err(ShopifyError::GraphQL(vec![GraphQLError {
                message: format!("HTTP {status}"),
                path: vec![],
            }]));
        }

        let parsed: GraphQLResponse<T> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse Shopify GraphQL response"
            );
            ShopifyError::Parse(e)
        })?;

        if let Some(errors) = parsed.errors
            && !errors.is_empty()
        {
            tracing::debug!(errors = ?errors, "GraphQL errors in response");
            return Err(ShopifyError::GraphQL(errors));
        }

        parsed.data.ok_or(ShopifyError::MissingData("data"))
    }

    /// Run a cart mutation whose payload sits under `root`.
    async fn mutate(
        &self,
        query: String,
        root: &'static str,
        variables: serde_json::Value,
    ) -> Result<Cart, ShopifyError> {
        let mut data: serde_json::Map<String, serde_json::Value> =
            self.execute(query, variables).await?;

        let payload = data
            .remove(root)
            .filter(|v| !v.is_null())
            .ok_or(ShopifyError::MissingData(root))?;

        serde_json::from_value::<RawMutationPayload>(payload)?.into_cart()
    }
}

fn line_inputs(lines: Vec<CartLineInput>) -> serde_json::Value {
    lines
        .into_iter()
        .map(|l| json!({ "merchandiseId": l.merchandise_id.as_str(), "quantity": l.quantity.get() }))
        .collect()
}

#[async_trait]
impl CommerceApi for StorefrontClient {
    #[instrument(skip(self, lines, customer_access_token), fields(lines = lines.len()))]
    async fn create_cart(
        &self,
        lines: Vec<CartLineInput>,
        customer_access_token: Option<&str>,
    ) -> Result<Cart, ShopifyError> {
        let mut input = json!({ "lines": line_inputs(lines) });
        if let Some(token) = customer_access_token {
            input["buyerIdentity"] = json!({ "customerAccessToken": token });
        }
        self.mutate(queries::create_cart(), "cartCreate", json!({ "input": input }))
            .await
    }

    #[instrument(skip(self), fields(cart_id = %cart))]
    async fn get_cart(&self, cart: &CartHandle) -> Result<Option<Cart>, ShopifyError> {
        #[derive(Deserialize)]
        struct Data {
            cart: Option<RawCart>,
        }

        let data: Data = self
            .execute(queries::get_cart(), json!({ "cartId": cart.as_str() }))
            .await?;
        data.cart.map(convert_cart).transpose()
    }

    #[instrument(skip(self, lines), fields(cart_id = %cart, lines = lines.len()))]
    async fn add_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineInput>,
    ) -> Result<Cart, ShopifyError> {
        self.mutate(
            queries::add_lines(),
            "cartLinesAdd",
            json!({ "cartId": cart.as_str(), "lines": line_inputs(lines) }),
        )
        .await
    }

    #[instrument(skip(self, lines), fields(cart_id = %cart, lines = lines.len()))]
    async fn update_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineUpdate>,
    ) -> Result<Cart, ShopifyError> {
        let lines: serde_json::Value = lines
            .into_iter()
            .map(|l| json!({ "id": l.id.as_str(), "quantity": l.quantity.get() }))
            .collect();
        self.mutate(
            queries::update_lines(),
            "cartLinesUpdate",
            json!({ "cartId": cart.as_str(), "lines": lines }),
        )
        .await
    }

    #[instrument(skip(self, line_ids), fields(cart_id = %cart, lines = line_ids.len()))]
    async fn remove_lines(
        &self,
        cart: &CartHandle,
        line_ids: Vec<LineId>,
    ) -> Result<Cart, ShopifyError> {
        let ids: Vec<String> = line_ids.into_iter().map(String::from).collect();
        self.mutate(
            queries::remove_lines(),
            "cartLinesRemove",
            json!({ "cartId": cart.as_str(), "lineIds": ids }),
        )
        .await
    }

    #[instrument(skip(self, customer_access_token), fields(cart_id = %cart))]
    async fn update_buyer_identity(
        &self,
        cart: &CartHandle,
        customer_access_token: &str,
    ) -> Result<Cart, ShopifyError> {
        self.mutate(
            queries::update_buyer_identity(),
            "cartBuyerIdentityUpdate",
            json!({
                "cartId": cart.as_str(),
                "buyerIdentity": { "customerAccessToken": customer_access_token },
            }),
        )
        .await
    }
}
