//! Shopify Customer Account API client.
//!
//! The Customer Account API authenticates commerce customers with OAuth 2.0
//! (authorization code + PKCE) and answers "who am I" for an access token.
//!
//! # OAuth Flow
//!
//! 1. Build the authorization URL with a PKCE challenge
//! 2. Redirect the customer to Shopify's login page
//! 3. Shopify redirects back with an authorization code
//! 4. Exchange code + verifier for tokens
//! 5. Use the access token for customer-scoped calls and cart binding

mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::instrument;

use crate::config::ShopifyConfig;
use crate::shopify::{IdentityProvider, ShopifyError};

const SCOPES: &str = "openid email customer-account-api:full";

#[derive(Debug, Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
}

impl<T> GraphQLResponse<T> {
    fn into_result(self) -> Result<T, ShopifyError> {
        if let Some(errors) = self.errors
            && !errors.is_empty()
        {
            let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ShopifyError::OAuth(messages.join("; ")));
        }

        self.data
            .ok_or_else(|| ShopifyError::OAuth("No data in response".to_string()))
    }
}

/// Client for the Shopify Customer Account API.
#[derive(Clone)]
pub struct CustomerClient {
    inner: Arc<CustomerClientInner>,
}

struct CustomerClientInner {
    client: reqwest::Client,
    shop_id: String,
    api_version: String,
    client_id: String,
    client_secret: SecretString,
}

impl CustomerClient {
    /// Create a new Customer Account API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ShopifyConfig, timeout: Duration) -> Result<Self, ShopifyError> {
        Ok(Self {
            inner: Arc::new(CustomerClientInner {
                client: reqwest::Client::builder().timeout(timeout).build()?,
                shop_id: config.customer_shop_id.clone(),
                api_version: config.api_version.clone(),
                client_id: config.customer_client_id.clone(),
                client_secret: config.customer_client_secret.clone(),
            }),
        })
    }

    fn token_url(&self) -> String {
        format!("https://shopify.com/{}/auth/oauth/token", self.inner.shop_id)
    }

    /// Post a token request and convert the response.
    async fn request_token(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> Result<CustomerAccessToken, ShopifyError> {
        let response = self
            .inner
            .client
            .post(self.token_url())
            .form(params)
            .send()
            .await
            .map_err(ShopifyError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "{what} rejected by identity provider");
            return Err(ShopifyError::OAuth(format!("{what} failed ({status}): {text}")));
        }

        let token: TokenResponse = response.json().await.map_err(ShopifyError::from_reqwest)?;
        Ok(token.into_token(chrono::Utc::now().timestamp()))
    }

    /// Execute a GraphQL query against the Customer Account API.
    async fn query<T: DeserializeOwned>(
        &self,
        access_token: &str,
        query: &str,
    ) -> Result<T, ShopifyError> {
        let url = format!(
            "https://shopify.com/{}/account/customer/api/{}/graphql",
            self.inner.shop_id, self.inner.api_version
        );

        let response = self
            .inner
            .client
            .post(&url)
            .header("Authorization", access_token)
            .json(&GraphQLRequest { query })
            .send()
            .await
            .map_err(ShopifyError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ShopifyError::OAuth(format!(
                "Customer API request failed ({status}): {text}"
            )));
        }

        let gql_response: GraphQLResponse<T> =
            response.json().await.map_err(ShopifyError::from_reqwest)?;
        gql_response.into_result()
    }
}

#[async_trait]
impl IdentityProvider for CustomerClient {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "https://shopify.com/{}/auth/oauth/authorize?\
            client_id={}&\
            response_type=code&\
            redirect_uri={}&\
            scope={}&\
            state={}&\
            nonce={}&\
            code_challenge={}&\
            code_challenge_method=S256",
            self.inner.shop_id,
            urlencoding::encode(&self.inner.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
            urlencoding::encode(code_challenge),
        )
    }

    fn logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> String {
        format!(
            "https://shopify.com/{}/auth/oauth/logout?\
            id_token_hint={}&\
            post_logout_redirect_uri={}",
            self.inner.shop_id,
            urlencoding::encode(id_token),
            urlencoding::encode(post_logout_redirect_uri)
        )
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<CustomerAccessToken, ShopifyError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.inner.client_id.as_str()),
            ("client_secret", self.inner.client_secret.expose_secret()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        self.request_token(&params, "Token exchange").await
    }

    #[instrument(skip_all)]
    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<CustomerAccessToken, ShopifyError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.inner.client_id.as_str()),
            ("client_secret", self.inner.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
        ];
        self.request_token(&params, "Token refresh").await
    }

    #[instrument(skip_all)]
    async fn current_customer(&self, access_token: &str) -> Result<Customer, ShopifyError> {
        #[derive(Deserialize)]
        struct Response {
            customer: Customer,
        }

        const QUERY: &str = r"
            query currentCustomer {
                customer {
                    id
                    emailAddress { emailAddress }
                    firstName
                    lastName
                }
            }
        ";

        let response: Response = self.query(access_token, QUERY).await?;
        Ok(response.customer)
    }
}
