//! GraphQL documents for the Storefront API cart operations.

/// Fields selected on every cart the bridge reads or mutates.
const CART_FRAGMENT: &str = r"
fragment CartFields on Cart {
  id
  checkoutUrl
  buyerIdentity {
    email
    customer { id email }
  }
  cost {
    subtotalAmount { amount currencyCode }
    totalAmount { amount currencyCode }
    totalTaxAmount { amount currencyCode }
    totalDutyAmount { amount currencyCode }
  }
  lines(first: 100) {
    edges {
      node {
        id
        quantity
        merchandise {
          ... on ProductVariant {
            id
            title
            quantityAvailable
            price { amount currencyCode }
            product {
              id
              title
              handle
              featuredImage { url altText }
            }
          }
        }
      }
    }
  }
}
";

const USER_ERRORS: &str = "userErrors { code field message }";

fn with_fragment(operation: &str) -> String {
    format!("{operation}\n{CART_FRAGMENT}")
}

pub fn get_cart() -> String {
    with_fragment("query GetCart($cartId: ID!) { cart(id: $cartId) { ...CartFields } }")
}

pub fn create_cart() -> String {
    with_fragment(&format!(
        "mutation CartCreate($input: CartInput!) {{ cartCreate(input: $input) {{ cart {{ ...CartFields }} {USER_ERRORS} }} }}"
    ))
}

pub fn add_lines() -> String {
    with_fragment(&format!(
        "mutation CartLinesAdd($cartId: ID!, $lines: [CartLineInput!]!) {{ cartLinesAdd(cartId: $cartId, lines: $lines) {{ cart {{ ...CartFields }} {USER_ERRORS} }} }}"
    ))
}

pub fn update_lines() -> String {
    with_fragment(&format!(
        "mutation CartLinesUpdate($cartId: ID!, $lines: [CartLineUpdateInput!]!) {{ cartLinesUpdate(cartId: $cartId, lines: $lines) {{ cart {{ ...CartFields }} {USER_ERRORS} }} }}"
    ))
}

pub fn remove_lines() -> String {
    with_fragment(&format!(
        "mutation CartLinesRemove($cartId: ID!, $lineIds: [ID!]!) {{ cartLinesRemove(cartId: $cartId, lineIds: $lineIds) {{ cart {{ ...CartFields }} {USER_ERRORS} }} }}"
    ))
}

pub fn update_buyer_identity() -> String {
    with_fragment(&format!(
        "mutation CartBuyerIdentityUpdate($cartId: ID!, $buyerIdentity: CartBuyerIdentityInput!) {{ cartBuyerIdentityUpdate(cartId: $cartId, buyerIdentity: $buyerIdentity) {{ cart {{ ...CartFields }} {USER_ERRORS} }} }}"
    ))
}
