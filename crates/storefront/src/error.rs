//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before the response is built. Clients always get the
//! JSON failure body `{success: false, code, message, retryable}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::auth::AuthError;
use crate::services::cart::{CartError, CommandError};
use crate::services::token_exchange::ExchangeError;
use crate::services::validation::GateError;
use crate::shopify::ShopifyError;

/// Application-level error type for the bridge.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),

    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Invalid cart request: {0}")]
    Command(#[from] CommandError),

    #[error("Token exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Validation gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or wrong REST nonce, or a request acting for another user.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON failure body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

struct Classified {
    status: StatusCode,
    code: &'static str,
    message: String,
    retryable: bool,
}

impl Classified {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retryable: false,
        }
    }

    const fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

const INTERNAL: &str = "Internal server error";
const UNAVAILABLE: &str = "The cart service is temporarily unavailable";

fn classify_shopify(err: &ShopifyError) -> Classified {
    match err {
        ShopifyError::UserErrors(_) => {
            Classified::new(StatusCode::UNPROCESSABLE_ENTITY, "cart_rejected", err.to_string())
        }
        ShopifyError::CartNotFound => {
            Classified::new(StatusCode::NOT_FOUND, "cart_not_found", "Cart not found")
        }
        ShopifyError::OAuth(_) => Classified::new(
            StatusCode::BAD_GATEWAY,
            "identity_provider_error",
            "The identity provider rejected the request",
        ),
        _ => Classified::new(StatusCode::SERVICE_UNAVAILABLE, "cart_unavailable", UNAVAILABLE)
            .retryable(),
    }
}

impl AppError {
    fn classify(&self) -> Classified {
        match self {
            Self::Database(_) | Self::Session(_) | Self::Gate(_) | Self::Internal(_) => {
                Classified::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
            }
            Self::Shopify(err) => classify_shopify(err),
            Self::Cart(err) => match err {
                CartError::Rejected(_) => Classified::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "cart_rejected",
                    err.to_string(),
                ),
                CartError::Unavailable(_) => {
                    Classified::new(StatusCode::SERVICE_UNAVAILABLE, "cart_unavailable", UNAVAILABLE)
                        .retryable()
                }
                CartError::Busy(_) => Classified::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "cart_busy",
                    "The cart is being updated, please retry",
                )
                .retryable(),
                CartError::NotFound => {
                    Classified::new(StatusCode::NOT_FOUND, "cart_not_found", "Cart not found")
                }
                CartError::CustomerUnconfirmed => Classified::new(
                    StatusCode::FORBIDDEN,
                    "customer_mismatch",
                    "The customer account does not belong to the logged-in user",
                ),
                CartError::Repository(_) | CartError::Session(_) => {
                    Classified::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
                }
            },
            Self::Command(err) => {
                Classified::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
            }
            Self::Exchange(err) => match err {
                ExchangeError::MissingParameter(_) => {
                    Classified::new(StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
                }
                ExchangeError::Provider(inner) => classify_shopify(inner),
                ExchangeError::Session(_) => {
                    Classified::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
                }
                _ => Classified::new(StatusCode::FORBIDDEN, "invalid_state", err.to_string()),
            },
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => Classified::new(
                    StatusCode::UNAUTHORIZED,
                    "invalid_credentials",
                    "Invalid credentials",
                ),
                AuthError::UserAlreadyExists => Classified::new(
                    StatusCode::CONFLICT,
                    "user_exists",
                    "An account with this email already exists",
                ),
                AuthError::WeakPassword(msg) => {
                    Classified::new(StatusCode::BAD_REQUEST, "weak_password", msg.clone())
                }
                AuthError::InvalidEmail(_) => Classified::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_email",
                    "Invalid email address",
                ),
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    Classified::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL)
                }
            },
            Self::BadRequest(msg) => {
                Classified::new(StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            Self::Forbidden(msg) => Classified::new(StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            Self::Unauthorized(msg) => {
                Classified::new(StatusCode::UNAUTHORIZED, "unauthorized", msg.clone())
            }
            Self::RateLimited => Classified::new(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            )
            .retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let classified = self.classify();

        if classified.status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::info!(error = %self, status = %classified.status, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            code: classified.code,
            message: classified.message,
            retryable: classified.retryable,
        };
        (classified.status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a cart or login step.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
