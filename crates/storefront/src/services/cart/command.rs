//! Parsing `/cart/lines` requests into [`CartCommand`]s.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use ec_relate_core::{CartHandle, CommerceIdError, LineId, MerchandiseId, Quantity, UserId};

use crate::shopify::{CartLineInput, CartLineUpdate};

/// Body of `POST /cart/lines`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLinesRequest {
    pub cart_id: Option<String>,
    pub line_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
    /// JSON-encoded string or a plain array of `{id, quantity}`.
    #[serde(rename = "form_data")]
    pub form_data: Option<Value>,
    /// Number or numeric string.
    #[serde(rename = "wp_user_id")]
    pub wp_user_id: Option<Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("missing parameter: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    InvalidId(#[from] CommerceIdError),

    #[error("invalid form_data: {0}")]
    InvalidFormData(String),

    #[error("invalid wp_user_id")]
    InvalidUserId,
}

/// A cart operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartCommand {
    /// `into_cart`: add one line, creating the cart if needed.
    AddLine(CartLineInput),
    /// `trush_out`: remove one line.
    RemoveLine(LineId),
    /// `calc_again`: bulk quantity update from the cart form.
    Recalculate(Vec<CartLineUpdate>),
    /// `soon_buy`: a throwaway single-line cart for immediate checkout.
    BuyNow(CartLineInput),
    Read,
}

impl CartCommand {
    /// Wire name of the mode, for logs.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::AddLine(_) => "into_cart",
            Self::RemoveLine(_) => "trush_out",
            Self::Recalculate(_) => "calc_again",
            Self::BuyNow(_) => "soon_buy",
            Self::Read => "read",
        }
    }

    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl CartLinesRequest {
    /// Build the command for this request. Unknown or absent modes read.
    ///
    /// # Errors
    ///
    /// Missing or malformed ids, negative quantities and unparseable
    /// `form_data` are rejected.
    pub fn command(&self) -> Result<CartCommand, CommandError> {
        match self.mode.as_deref().map(str::trim).unwrap_or_default() {
            "into_cart" => Ok(CartCommand::AddLine(self.line_input()?)),
            "soon_buy" => Ok(CartCommand::BuyNow(self.line_input()?)),
            "trush_out" => {
                let raw = non_empty(self.line_id.as_deref()).ok_or(CommandError::Missing("lineId"))?;
                Ok(CartCommand::RemoveLine(LineId::parse(raw)?))
            }
            "calc_again" => Ok(CartCommand::Recalculate(parse_form_data(self.form_data.as_ref())?)),
            _ => Ok(CartCommand::Read),
        }
    }

    /// The `cartId` from the body, if it is a well formed handle.
    #[must_use]
    pub fn requested_handle(&self) -> Option<CartHandle> {
        non_empty(self.cart_id.as_deref()).and_then(|raw| CartHandle::parse(raw).ok())
    }

    /// The host user id the client claims to be acting for.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidUserId`] for anything but a positive
    /// integer or numeric string.
    pub fn claimed_user(&self) -> Result<Option<UserId>, CommandError> {
        let id = match &self.wp_user_id {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            Some(Value::Number(n)) => n.as_i64(),
            Some(_) => None,
        };
        match id {
            Some(0) => Ok(None),
            Some(n) if n > 0 => Ok(Some(UserId::new(n))),
            _ => Err(CommandError::InvalidUserId),
        }
    }

    fn line_input(&self) -> Result<CartLineInput, CommandError> {
        let raw = non_empty(self.product_id.as_deref()).ok_or(CommandError::Missing("productId"))?;
        let quantity = match self.quantity {
            None | Some(0) => Quantity::ONE,
            Some(n) => Quantity::from_signed(n)?,
        };
        Ok(CartLineInput {
            merchandise_id: MerchandiseId::parse(raw)?,
            quantity,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Parse the cart form. Entries whose id is not a cart line are skipped.
fn parse_form_data(raw: Option<&Value>) -> Result<Vec<CartLineUpdate>, CommandError> {
    let entries = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map_err(|e| CommandError::InvalidFormData(e.to_string()))?,
        Some(other) => other.clone(),
    };
    let Value::Array(entries) = entries else {
        return Err(CommandError::InvalidFormData("expected an array".to_string()));
    };

    let mut lines = Vec::with_capacity(entries.len());
    for entry in &entries {
        let Some(id) = entry
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| LineId::parse(id).ok())
        else {
            tracing::debug!("skipping form_data entry without a valid line id");
            continue;
        };
        let quantity = match entry.get("quantity") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| CommandError::InvalidFormData(format!("bad quantity for {id}")))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| CommandError::InvalidFormData(format!("bad quantity for {id}")))?,
            Some(_) => {
                return Err(CommandError::InvalidFormData(format!("bad quantity for {id}")));
            }
        };
        lines.push(CartLineUpdate {
            id,
            quantity: Quantity::from_signed(quantity)?,
        });
    }
    Ok(lines)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(body: Value) -> CartLinesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn add_defaults_quantity_to_one() {
        let cmd = request(json!({
            "mode": "into_cart",
            "productId": "gid://shopify/ProductVariant/42",
            "quantity": 0
        }))
        .command()
        .unwrap();
        let CartCommand::AddLine(line) = cmd else {
            panic!("expected AddLine, got {cmd:?}");
        };
        assert_eq!(line.quantity, Quantity::ONE);
        assert_eq!(line.merchandise_id.as_str(), "gid://shopify/ProductVariant/42");
    }

    #[test]
    fn add_rejects_missing_or_foreign_ids() {
        assert_eq!(
            request(json!({"mode": "into_cart"})).command(),
            Err(CommandError::Missing("productId"))
        );
        assert!(matches!(
            request(json!({"mode": "soon_buy", "productId": "gid://shopify/Product/1"})).command(),
            Err(CommandError::InvalidId(_))
        ));
        assert!(matches!(
            request(json!({
                "mode": "into_cart",
                "productId": "gid://shopify/ProductVariant/1",
                "quantity": -2
            }))
            .command(),
            Err(CommandError::InvalidId(CommerceIdError::NegativeQuantity(-2)))
        ));
    }

    #[test]
    fn unknown_mode_reads() {
        assert_eq!(request(json!({})).command().unwrap(), CartCommand::Read);
        assert_eq!(request(json!({"mode": "peek"})).command().unwrap(), CartCommand::Read);
    }

    #[test]
    fn form_data_accepts_string_or_array_and_skips_bad_ids() {
        let encoded = json!([
            {"id": "gid://shopify/CartLine/abc-1?cart=x", "quantity": "3"},
            {"id": "gid://shopify/Product/9", "quantity": 1},
            {"id": "gid://shopify/CartLine/def", "quantity": 0},
            {"quantity": 5}
        ]);
        for form_data in [Value::String(encoded.to_string()), encoded.clone()] {
            let cmd = request(json!({"mode": "calc_again", "form_data": form_data}))
                .command()
                .unwrap();
            let CartCommand::Recalculate(lines) = cmd else {
                panic!("expected Recalculate");
            };
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[0].quantity, Quantity::new(3));
            assert!(lines[1].quantity.is_zero());
        }
    }

    #[test]
    fn form_data_rejects_negative_quantities() {
        let body = json!({
            "mode": "calc_again",
            "form_data": [{"id": "gid://shopify/CartLine/a", "quantity": -1}]
        });
        assert!(matches!(
            request(body).command(),
            Err(CommandError::InvalidId(CommerceIdError::NegativeQuantity(-1)))
        ));
        assert!(matches!(
            request(json!({"mode": "calc_again", "form_data": "{not json"})).command(),
            Err(CommandError::InvalidFormData(_))
        ));
    }

    #[test]
    fn claimed_user_accepts_numbers_and_strings() {
        assert_eq!(request(json!({"wp_user_id": 5})).claimed_user(), Ok(Some(UserId::new(5))));
        assert_eq!(request(json!({"wp_user_id": " 6 "})).claimed_user(), Ok(Some(UserId::new(6))));
        assert_eq!(request(json!({"wp_user_id": ""})).claimed_user(), Ok(None));
        assert_eq!(request(json!({"wp_user_id": 0})).claimed_user(), Ok(None));
        assert_eq!(
            request(json!({"wp_user_id": "abc"})).claimed_user(),
            Err(CommandError::InvalidUserId)
        );
    }

    #[test]
    fn requested_handle_ignores_garbage() {
        assert!(request(json!({"cartId": "nope"})).requested_handle().is_none());
        assert!(request(json!({"cartId": "gid://shopify/Cart/c1"})).requested_handle().is_some());
    }
}
