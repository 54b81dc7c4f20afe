//! Raw Storefront API payloads and their conversion into [`Cart`].

use ec_relate_core::CartHandle;
use serde::Deserialize;

use crate::shopify::ShopifyError;
use crate::shopify::types::{
    BuyerIdentity, Cart, CartCost, CartLine, CartUserError, Image, Merchandise, Money,
    ProductSnapshot,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCart {
    id: String,
    checkout_url: String,
    buyer_identity: Option<RawBuyerIdentity>,
    cost: Option<RawCost>,
    lines: RawConnection<RawLine>,
}

#[derive(Debug, Deserialize)]
struct RawBuyerIdentity {
    email: Option<String>,
    customer: Option<RawCustomer>,
}

#[derive(Debug, Deserialize)]
struct RawCustomer {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCost {
    subtotal_amount: Option<Money>,
    total_amount: Option<Money>,
    total_tax_amount: Option<Money>,
    total_duty_amount: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct RawConnection<T> {
    edges: Vec<RawEdge<T>>,
}

#[derive(Debug, Deserialize)]
struct RawEdge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    id: String,
    quantity: u32,
    merchandise: Option<RawMerchandise>,
}

/// The inline fragment only selects variant fields, so other merchandise
/// types arrive as `{}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMerchandise {
    Variant(RawVariant),
    #[allow(dead_code)]
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVariant {
    id: String,
    title: String,
    quantity_available: Option<i64>,
    price: Money,
    product: RawProduct,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    id: String,
    title: String,
    handle: String,
    featured_image: Option<Image>,
}

/// `{ cart, userErrors }` payload shared by every cart mutation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMutationPayload {
    cart: Option<RawCart>,
    #[serde(default)]
    user_errors: Vec<CartUserError>,
}

impl RawMutationPayload {
    /// Resolve a mutation payload into the updated cart.
    ///
    /// User errors win over a returned cart; an unknown-cart error maps to
    /// [`ShopifyError::CartNotFound`].
    pub fn into_cart(self) -> Result<Cart, ShopifyError> {
        if !self.user_errors.is_empty() {
            if self.cart.is_none() && self.user_errors.iter().any(CartUserError::is_unknown_cart) {
                return Err(ShopifyError::CartNotFound);
            }
            return Err(ShopifyError::UserErrors(self.user_errors));
        }
        self.cart
            .ok_or(ShopifyError::MissingData("cart"))
            .and_then(convert_cart)
    }
}

pub fn convert_cart(raw: RawCart) -> Result<Cart, ShopifyError> {
    let id = CartHandle::parse(&raw.id).map_err(|e| {
        tracing::error!(error = %e, cart_id = %raw.id, "Storefront returned malformed cart id");
        ShopifyError::MissingData("cart id")
    })?;

    let buyer = raw.buyer_identity.and_then(|b| {
        b.customer.map(|c| BuyerIdentity {
            customer_id: c.id,
            email: c.email.or(b.email),
        })
    });

    let cost = raw.cost.map_or_else(CartCost::default, |c| CartCost {
        subtotal: c.subtotal_amount,
        total: c.total_amount,
        total_tax: c.total_tax_amount,
        total_duty: c.total_duty_amount,
    });

    let lines = raw
        .lines
        .edges
        .into_iter()
        .filter_map(|edge| {
            let line = edge.node;
            let Some(RawMerchandise::Variant(variant)) = line.merchandise else {
                tracing::warn!(line_id = %line.id, "Skipping cart line without variant");
                return None;
            };
            Some(CartLine {
                id: line.id,
                quantity: line.quantity,
                merchandise: Merchandise {
                    id: variant.id,
                    title: variant.title,
                    quantity_available: variant.quantity_available,
                    price: variant.price,
                    product: ProductSnapshot {
                        id: variant.product.id,
                        title: variant.product.title,
                        handle: variant.product.handle,
                        featured_image: variant.product.featured_image,
                    },
                },
            })
        })
        .collect();

    Ok(Cart {
        id,
        checkout_url: raw.checkout_url,
        buyer,
        cost,
        lines,
    })
}
