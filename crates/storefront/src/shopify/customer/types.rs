//! Types for Shopify Customer Account API OAuth and responses.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds before the real expiry at which a token is treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Customer tokens obtained via OAuth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccessToken {
    pub access_token: String,
    /// The ID token (`OpenID` Connect), needed for provider logout.
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds.
    pub expires_in: Option<i64>,
    /// Unix timestamp when the token was obtained.
    pub obtained_at: i64,
}

impl CustomerAccessToken {
    /// Check if the access token is expired (with a 60s buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_in
            .is_some_and(|ttl| now >= self.obtained_at + ttl - EXPIRY_SKEW_SECS)
    }

    /// Unix timestamp at which the token stops being valid, if known.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_in.map(|ttl| self.obtained_at + ttl)
    }
}

/// Raw token response from Shopify OAuth endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    pub(super) fn into_token(self, obtained_at: i64) -> CustomerAccessToken {
        CustomerAccessToken {
            access_token: self.access_token,
            id_token: self.id_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            obtained_at,
        }
    }
}

/// A Shopify customer as reported by the "who am I" query.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub email_address: Option<EmailAddress>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAddress {
    pub email_address: Option<String>,
}

impl Customer {
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|e| e.email_address.as_deref())
    }

    /// The customer's full name, or an empty string.
    #[must_use]
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token(expires_in: Option<i64>) -> CustomerAccessToken {
        CustomerAccessToken {
            access_token: "shcat_x".to_string(),
            id_token: None,
            refresh_token: None,
            expires_in,
            obtained_at: 1_000,
        }
    }

    #[test]
    fn expiry_applies_skew() {
        let t = token(Some(3_600));
        assert!(!t.is_expired_at(1_000));
        assert!(!t.is_expired_at(4_539));
        assert!(t.is_expired_at(4_540));
        assert_eq!(t.expires_at(), Some(4_600));
    }

    #[test]
    fn tokens_without_ttl_never_expire() {
        assert!(!token(None).is_expired_at(i64::MAX / 2));
    }

    #[test]
    fn customer_email_is_nested() {
        let c: Customer = serde_json::from_value(serde_json::json!({
            "id": "gid://shopify/Customer/1",
            "emailAddress": {"emailAddress": "Jane@Example.com"},
            "firstName": "Jane",
            "lastName": null
        }))
        .unwrap();
        assert_eq!(c.email(), Some("Jane@Example.com"));
        assert_eq!(c.full_name(), "Jane");
    }
}
