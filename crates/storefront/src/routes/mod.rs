//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness
//! GET  /health/ready                    - Readiness (database ping)
//!
//! # JSON API (X-Rest-Nonce required unless noted)
//! GET  /api/v1/nonce                    - Issue REST nonce (no nonce)
//! POST /api/v1/cart/lines               - Reconcile cart
//! POST /api/v1/cart/bind                - Attach buyer identity (login)
//! POST /api/v1/customer-token-exchange  - OAuth code to tokens
//! GET  /api/v1/validate-customer        - Validation gate
//! POST /api/v1/validate-customer        - Validation gate
//! POST /api/v1/wp-logout-redirect       - Signed logout URL
//! POST /api/v1/register                 - Pending registration
//! POST /api/v1/login                    - Host login
//!
//! # Browser
//! GET  /auth/shopify/login              - Begin OAuth
//! GET  /auth/shopify/callback           - OAuth callback
//! GET  /auth/logout                     - Signed host logout
//! GET  /auth/logout/complete            - Residual cleanup
//! ```

pub mod cart;
pub mod customer;
pub mod shopify_auth;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::state::AppState;

/// Credential-handling JSON routes. Rate limited more strictly.
pub fn credential_routes() -> Router<AppState> {
    Router::new()
        .route("/customer-token-exchange", post(customer::token_exchange))
        .route("/register", post(customer::register))
        .route("/login", post(customer::login))
}

/// Cart and session JSON routes.
pub fn cart_api_routes() -> Router<AppState> {
    Router::new()
        .route("/nonce", get(customer::nonce))
        .route("/cart/lines", post(cart::lines))
        .route("/cart/bind", post(cart::bind))
        .route(
            "/validate-customer",
            get(customer::validate_customer).post(customer::validate_customer),
        )
        .route("/wp-logout-redirect", post(customer::logout_redirect))
}

/// Browser redirect routes.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/shopify/login", get(shopify_auth::login))
        .route("/shopify/callback", get(shopify_auth::callback))
        .route("/logout", get(shopify_auth::logout))
        .route("/logout/complete", get(shopify_auth::logout_complete))
}

/// Health check routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
}

/// All routes, without rate limiting or session layers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", credential_routes().merge(cart_api_routes()))
        .nest("/auth", auth_routes())
        .merge(health_routes())
}

/// Liveness check.
async fn health() -> &'static str {
    "ok"
}

/// Readiness check: the database must answer when one is configured.
async fn readiness(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let Some(pool) = state.pool() else {
        return Ok("ok");
    };
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    Ok("ok")
}
