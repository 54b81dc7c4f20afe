//! Cart types shared by the Storefront client and the cart services.
//!
//! These are the flattened shapes handed to browsers. The raw GraphQL
//! payloads (connections, edges, nodes) are converted in the client.

use ec_relate_core::{CartHandle, LineId, MerchandiseId, Quantity};
use serde::{Deserialize, Serialize};

/// Monetary amount with currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    /// Decimal amount as string (preserves precision).
    pub amount: String,
    /// ISO 4217 currency code.
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub url: String,
    pub alt_text: Option<String>,
}

/// Product fields copied onto each line for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: String,
    pub title: String,
    pub handle: String,
    pub featured_image: Option<Image>,
}

/// The variant a cart line points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchandise {
    pub id: String,
    pub title: String,
    pub quantity_available: Option<i64>,
    pub price: Money,
    pub product: ProductSnapshot,
}

/// A line in a remote cart. Held only long enough to render a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: String,
    pub quantity: u32,
    pub merchandise: Merchandise,
}

/// Cost summary reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCost {
    pub subtotal: Option<Money>,
    pub total: Option<Money>,
    pub total_tax: Option<Money>,
    pub total_duty: Option<Money>,
}

/// Customer attached to a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerIdentity {
    pub customer_id: String,
    pub email: Option<String>,
}

/// A remote cart after conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: CartHandle,
    pub checkout_url: String,
    pub buyer: Option<BuyerIdentity>,
    pub cost: CartCost,
    pub lines: Vec<CartLine>,
}

impl Cart {
    /// Sum of line quantities, recomputed from the lines the platform returned.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// Input for adding a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineInput {
    pub merchandise_id: MerchandiseId,
    pub quantity: Quantity,
}

/// Input for changing a line's quantity. Zero removes the line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CartLineUpdate {
    pub id: LineId,
    pub quantity: Quantity,
}

/// Business-rule error returned by a cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartUserError {
    pub code: Option<String>,
    pub field: Option<Vec<String>>,
    pub message: String,
}

impl CartUserError {
    /// Whether the error says the cart argument itself is unknown.
    #[must_use]
    pub fn is_unknown_cart(&self) -> bool {
        self.field
            .as_deref()
            .is_some_and(|f| f.iter().any(|segment| segment == "cartId"))
    }
}
