//! HTTP middleware and extractors.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` with a per-request span
//! 3. Request ID
//! 4. Session layer (tower-sessions with `PostgreSQL` store)
//! 5. Rate limiting on `/api/v1` (governor)
//!
//! # Extractors
//!
//! - [`ClientState`](crate::services::client_state::ClientState) - session-backed client state
//! - [`VerifiedNonce`] - `X-Rest-Nonce` matches the session nonce
//! - [`RequireAuth`] / [`OptionalAuth`] - host user
//! - [`CartCookie`] - anonymous cart handle

pub mod auth;
pub mod cart_cookie;
pub mod rate_limit;
pub mod request_id;
pub mod rest_nonce;
pub mod session;

pub use auth::{OptionalAuth, RequireAuth};
pub use cart_cookie::{CART_COOKIE_NAME, CartCookie, CartCookieUpdate};
pub use rate_limit::{api_rate_limiter, auth_rate_limiter};
pub use request_id::{request_id_middleware, request_span};
pub use rest_nonce::{REST_NONCE_HEADER, VerifiedNonce};
pub use session::{create_session_layer, session_layer};
