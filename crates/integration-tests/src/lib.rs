//! Router-level tests for the EC Relate bridge.
//!
//! The full axum router runs in-process on in-memory repositories, a fake
//! commerce platform and a fake identity provider. [`Browser`] keeps a
//! cookie jar and the REST nonce across requests, so multi-step flows read
//! like a visitor clicking through the site.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p ec-relate-integration-tests
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::MemoryStore;
use tower_sessions::cookie::Cookie;

use ec_relate_core::Email;
use ec_relate_storefront::config::{BridgeConfig, CartConfig, ShopifyConfig};
use ec_relate_storefront::db::UserRepository;
use ec_relate_storefront::db::memory::MemoryDb;
use ec_relate_storefront::middleware::{CART_COOKIE_NAME, REST_NONCE_HEADER, session_layer};
use ec_relate_storefront::models::User;
use ec_relate_storefront::routes;
use ec_relate_storefront::services::auth::hash_password;
use ec_relate_storefront::shopify::memory::{MemoryCommerce, MemoryIdentity};
use ec_relate_storefront::state::{AppState, Parts};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const BASE_URL: &str = "https://shop.test";
pub const PASSWORD: &str = "correct horse battery";

/// Configuration for in-process tests.
#[must_use]
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        database_url: SecretString::from("postgres://unused"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        base_url: BASE_URL.to_string(),
        session_secret: SecretString::from("integration-test-signing-key-0123456789"),
        shopify: ShopifyConfig {
            store: "test.myshopify.com".to_string(),
            api_version: "2025-04".to_string(),
            storefront_token: SecretString::from("storefront-token"),
            customer_shop_id: "1234".to_string(),
            customer_client_id: "client".to_string(),
            customer_client_secret: SecretString::from("client-secret"),
        },
        cart: CartConfig::default(),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 0.0,
        sentry_traces_sample_rate: 0.0,
    }
}

/// The app under test and handles on its fakes.
pub struct TestApp {
    pub db: Arc<MemoryDb>,
    pub commerce: Arc<MemoryCommerce>,
    pub identity: Arc<MemoryIdentity>,
    router: Router,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let db = Arc::new(MemoryDb::new());
        let commerce = Arc::new(MemoryCommerce::new());
        let identity = Arc::new(MemoryIdentity::new());
        let state = AppState::from_parts(
            test_config(),
            Parts {
                users: db.clone(),
                meta: db.clone(),
                pending: db.clone(),
                commerce: commerce.clone(),
                identity: identity.clone(),
            },
        );
        let router = routes::routes()
            .layer(session_layer(MemoryStore::default(), false))
            .with_state(state);
        Self {
            db,
            commerce,
            identity,
            router,
        }
    }

    /// A fresh visitor with no cookies.
    #[must_use]
    pub fn browser(&self) -> Browser {
        Browser {
            router: self.router.clone(),
            jar: HashMap::new(),
            nonce: None,
        }
    }

    /// Create a host user with [`PASSWORD`].
    pub async fn create_user(&self, email: &str) -> TestResult<User> {
        let email = Email::parse(email)?;
        let hash = hash_password(PASSWORD)?;
        Ok(UserRepository::create(self.db.as_ref(), &email, "Test User", &hash).await?)
    }

    /// Register a customer with both fakes and make `code` yield its token.
    pub fn register_customer(&self, code: &str, access_token: &str, customer_id: &str, email: &str) {
        self.identity
            .register_code(code, MemoryIdentity::token(access_token));
        self.identity
            .register_customer(access_token, customer_id, email);
        self.commerce
            .register_customer(access_token, customer_id, email);
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> TestResult<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// The `Set-Cookie` for `name`, if the response sent one.
    #[must_use]
    pub fn set_cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| Cookie::parse(v.to_string()).ok())
            .find(|c| c.name() == name)
    }

    /// Whether the response deleted the cart cookie.
    #[must_use]
    pub fn clears_cart_cookie(&self) -> bool {
        self.set_cookie(CART_COOKIE_NAME).is_some_and(|c| {
            c.value().is_empty() && c.max_age().is_some_and(|age| age.is_zero())
        })
    }
}

/// A visitor: cookie jar plus the REST nonce once fetched.
pub struct Browser {
    router: Router,
    jar: HashMap<String, String>,
    nonce: Option<String>,
}

impl Browser {
    /// Current value of a cookie in the jar.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name).cloned()
    }

    /// The decoded cart handle held in the cart cookie.
    #[must_use]
    pub fn cart_cookie(&self) -> Option<String> {
        self.cookie(CART_COOKIE_NAME)
            .and_then(|v| urlencoding::decode(&v).ok().map(|s| s.into_owned()))
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.jar.insert(name.to_string(), value.to_string());
    }

    /// Use a different nonce on later requests.
    pub fn set_nonce(&mut self, nonce: Option<&str>) {
        self.nonce = nonce.map(String::from);
    }

    pub async fn send(&mut self, mut request: Request<Body>) -> TestResult<TestResponse> {
        if !self.jar.is_empty() {
            let cookie = self
                .jar
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse()?);
        }
        if let Some(nonce) = &self.nonce {
            request
                .headers_mut()
                .insert(REST_NONCE_HEADER, nonce.parse()?);
        }

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;

        for value in headers.get_all(header::SET_COOKIE) {
            let cookie = Cookie::parse(value.to_str()?.to_string())?;
            let expired = cookie.max_age().is_some_and(|age| age.is_zero());
            if expired || cookie.value().is_empty() {
                self.jar.remove(cookie.name());
            } else {
                self.jar
                    .insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }

        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }

    pub async fn get(&mut self, uri: &str) -> TestResult<TestResponse> {
        let request = Request::builder().uri(uri).body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_json(&mut self, uri: &str, body: &Value) -> TestResult<TestResponse> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.send(request).await
    }

    /// Fetch the REST nonce and send it on every later request.
    pub async fn fetch_nonce(&mut self) -> TestResult<String> {
        let response = self.get("/api/v1/nonce").await?;
        let nonce = response.json()?["nonce"]
            .as_str()
            .ok_or("nonce missing from response")?
            .to_string();
        self.nonce = Some(nonce.clone());
        Ok(nonce)
    }

    /// Log a host user in with [`PASSWORD`].
    pub async fn log_in(&mut self, email: &str) -> TestResult<Value> {
        let response = self
            .post_json(
                "/api/v1/login",
                &serde_json::json!({ "email": email, "password": PASSWORD }),
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(format!("login failed: {}", response.status).into());
        }
        response.json()
    }

    /// Walk the OAuth redirect and return the signed `state` the provider
    /// would echo back.
    pub async fn start_login(&mut self, return_to: &str) -> TestResult<String> {
        let response = self
            .get(&format!(
                "/auth/shopify/login?return_to={}",
                urlencoding::encode(return_to)
            ))
            .await?;
        let location = response.location().ok_or("login did not redirect")?;
        let url = url::Url::parse(location)?;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .ok_or("authorization URL has no state")?;
        Ok(state)
    }

    /// Reconcile the cart with a raw request body.
    pub async fn cart(&mut self, body: &Value) -> TestResult<TestResponse> {
        self.post_json("/api/v1/cart/lines", body).await
    }
}

/// A product variant id for tests.
#[must_use]
pub fn variant(n: u32) -> String {
    format!("gid://shopify/ProductVariant/{n}")
}
