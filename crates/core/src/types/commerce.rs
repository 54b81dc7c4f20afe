//! Commerce-side identifiers.
//!
//! Every identifier the commerce platform hands out is a global id of the form
//! `gid://shopify/<Kind>/<tail>`. Browsers echo these back to us, so they are
//! validated once at the edge and carried as distinct types afterwards.

use core::fmt;

use serde::{Deserialize, Serialize};

const GID_PREFIX: &str = "gid://shopify/";
const MAX_GID_LENGTH: usize = 512;

/// Errors produced when validating a commerce identifier or quantity.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommerceIdError {
    #[error("{kind} id cannot be empty")]
    Empty { kind: &'static str },
    #[error("{kind} id must start with gid://shopify/{kind}/")]
    WrongKind { kind: &'static str },
    #[error("{kind} id has an invalid tail")]
    InvalidTail { kind: &'static str },
    #[error("{kind} id is too long")]
    TooLong { kind: &'static str },
    #[error("quantity cannot be negative (got {0})")]
    NegativeQuantity(i64),
    #[error("quantity {0} is out of range")]
    QuantityOutOfRange(i64),
}

fn check_gid<'a>(
    raw: &'a str,
    kind: &'static str,
    tail_ok: fn(char) -> bool,
) -> Result<&'a str, CommerceIdError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CommerceIdError::Empty { kind });
    }
    if raw.len() > MAX_GID_LENGTH {
        return Err(CommerceIdError::TooLong { kind });
    }
    let tail = raw
        .strip_prefix(GID_PREFIX)
        .and_then(|rest| rest.strip_prefix(kind))
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or(CommerceIdError::WrongKind { kind })?;

    match tail.chars().next() {
        Some(c) if tail_ok(c) && !tail.chars().any(char::is_whitespace) => Ok(raw),
        _ => Err(CommerceIdError::InvalidTail { kind }),
    }
}

macro_rules! define_gid {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $tail_ok:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const KIND: &'static str = $kind;

            /// Validate and wrap a raw global id.
            ///
            /// # Errors
            ///
            /// Returns an error when the value is not a well formed global id
            /// of this kind.
            pub fn parse(raw: &str) -> Result<Self, CommerceIdError> {
                check_gid(raw, $kind, $tail_ok).map(|s| Self(s.to_owned()))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CommerceIdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_gid!(
    /// Opaque remote cart identifier, e.g. `gid://shopify/Cart/c1-abc?key=def`.
    ///
    /// Never edited locally: every cart mutation returns a handle that replaces
    /// the stored one.
    CartHandle,
    "Cart",
    |c: char| c.is_ascii_alphanumeric()
);

define_gid!(
    /// A line inside a remote cart.
    ///
    /// Only lowercase alphanumerics and `-` may start the tail, which is what
    /// the platform emits and what the cart form is checked against.
    LineId,
    "CartLine",
    |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
);

define_gid!(
    /// A purchasable product variant.
    MerchandiseId,
    "ProductVariant",
    |c: char| c.is_ascii_alphanumeric()
);

define_gid!(
    /// A commerce customer account.
    CustomerId,
    "Customer",
    |c: char| c.is_ascii_alphanumeric()
);

/// A non-negative line quantity. Zero on update means "remove the line".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Convert a signed wire value.
    ///
    /// # Errors
    ///
    /// Negative values and values that do not fit in `u32` are rejected.
    pub fn from_signed(n: i64) -> Result<Self, CommerceIdError> {
        if n < 0 {
            return Err(CommerceIdError::NegativeQuantity(n));
        }
        u32::try_from(n)
            .map(Self)
            .map_err(|_| CommerceIdError::QuantityOutOfRange(n))
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = i64::deserialize(d)?;
        Self::from_signed(n).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
