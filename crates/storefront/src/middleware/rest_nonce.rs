//! REST nonce check for the JSON endpoints.
//!
//! `GET /api/v1/nonce` issues a per-session nonce; every other JSON endpoint
//! must echo it in the `X-Rest-Nonce` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use crate::error::AppError;
use crate::models::keys;

/// The HTTP header carrying the REST nonce.
pub const REST_NONCE_HEADER: &str = "x-rest-nonce";

/// Proof that the request carried this session's nonce.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedNonce;

impl<S> FromRequestParts<S> for VerifiedNonce
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forbidden = || AppError::Forbidden("invalid or missing nonce".to_string());

        let presented = parts
            .headers
            .get(REST_NONCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(forbidden)?;
        let session = parts.extensions.get::<Session>().ok_or_else(forbidden)?;
        let expected: String = session.get(keys::REST_NONCE).await?.ok_or_else(forbidden)?;

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            tracing::info!("request rejected: REST nonce mismatch");
            Err(forbidden())
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_requires_equal_bytes() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
