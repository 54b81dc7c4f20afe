//! Session-related types.
//!
//! The session doubles as the client-side state store: login identity,
//! customer tokens, in-flight OAuth state and the last bind all live here.

use serde::{Deserialize, Serialize};

use ec_relate_core::{Email, UserId};

/// Session-stored host user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: Email,
}

/// Session keys.
pub mod keys {
    /// The logged-in host user.
    pub const CURRENT_USER: &str = "current_user";

    /// Commerce customer tokens from the last successful exchange.
    pub const CUSTOMER_TOKEN: &str = "shopify_customer_token";

    /// In-flight OAuth login (nonce, verifier, signed state).
    pub const OAUTH_PENDING: &str = "shopify_oauth_pending";

    /// Nonce required on JSON endpoints.
    pub const REST_NONCE: &str = "rest_nonce";

    /// Cart handle and token fingerprint of the last successful bind.
    pub const LAST_BIND: &str = "shopify_last_bind";

    /// Host user and customer the validation gate last matched by email.
    pub const CUSTOMER_MATCH: &str = "shopify_customer_match";
}
