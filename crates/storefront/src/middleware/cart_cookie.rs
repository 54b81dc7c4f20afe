//! The anonymous cart cookie.
//!
//! `shopify_cart_id` holds the URL-encoded cart handle of a visitor who is
//! not logged in. Handlers read it through [`CartCookie`] and write it by
//! returning a [`CartCookieUpdate`] in their response.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderValue, request::Parts};
use axum::response::{IntoResponseParts, ResponseParts};
use tower_sessions::cookie::{Cookie, SameSite};

use ec_relate_core::CartHandle;

use crate::services::identity::CookieChange;

/// Name of the anonymous cart cookie.
pub const CART_COOKIE_NAME: &str = "shopify_cart_id";

/// The cart handle from the request cookie, if present and well formed.
#[derive(Debug, Clone, Default)]
pub struct CartCookie(pub Option<CartHandle>);

impl<S> FromRequestParts<S> for CartCookie
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let handle = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|c| c.name() == CART_COOKIE_NAME)
            .and_then(|c| {
                let decoded = urlencoding::decode(c.value()).ok()?;
                CartHandle::parse(&decoded).ok()
            });
        Ok(Self(handle))
    }
}

/// A pending change to the cart cookie, applied as a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CartCookieUpdate {
    change: CookieChange,
    ttl: Duration,
    secure: bool,
}

impl CartCookieUpdate {
    #[must_use]
    pub const fn new(change: CookieChange, ttl: Duration, secure: bool) -> Self {
        Self {
            change,
            ttl,
            secure,
        }
    }

    /// The `Set-Cookie` value, or `None` when the cookie stays as it is.
    #[must_use]
    pub fn header_value(&self) -> Option<HeaderValue> {
        let (value, max_age) = match &self.change {
            CookieChange::Keep => return None,
            CookieChange::Set(handle) => (
                urlencoding::encode(handle.as_str()).into_owned(),
                i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
            ),
            CookieChange::Clear => (String::new(), 0),
        };
        let cookie = Cookie::build((CART_COOKIE_NAME, value))
            .path("/")
            .same_site(SameSite::Lax)
            .http_only(true)
            .secure(self.secure)
            .max_age(tower_sessions::cookie::time::Duration::seconds(max_age))
            .build();
        HeaderValue::from_str(&cookie.to_string()).ok()
    }
}

impl IntoResponseParts for CartCookieUpdate {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Some(value) = self.header_value() {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Ok(res)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn handle() -> CartHandle {
        CartHandle::parse("gid://shopify/Cart/c1-abc?key=k1").unwrap()
    }

    #[test]
    fn set_cookie_is_encoded_and_scoped() {
        let value = CartCookieUpdate::new(
            CookieChange::Set(handle()),
            Duration::from_secs(604_800),
            false,
        )
        .header_value()
        .unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with("shopify_cart_id=gid%3A%2F%2Fshopify%2FCart%2Fc1-abc%3Fkey%3Dk1"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Max-Age=604800"));
    }

    #[test]
    fn clear_expires_immediately_and_keep_writes_nothing() {
        let cleared = CartCookieUpdate::new(CookieChange::Clear, Duration::from_secs(60), true)
            .header_value()
            .unwrap();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
        assert!(
            CartCookieUpdate::new(CookieChange::Keep, Duration::from_secs(60), true)
                .header_value()
                .is_none()
        );
    }

    #[tokio::test]
    async fn reads_encoded_cookie() {
        let encoded = urlencoding::encode(handle().as_str()).into_owned();
        let request = Request::builder()
            .header(COOKIE, format!("other=1; {CART_COOKIE_NAME}={encoded}"))
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();
        let CartCookie(found) = CartCookie::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(found, Some(handle()));
    }
}
