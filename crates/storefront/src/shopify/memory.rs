//! In-memory commerce platform and identity provider.
//!
//! [`MemoryCommerce`] keeps carts in a map and counts every call, which is
//! what the cart tests assert against ("zero remote calls", "exactly one
//! create"). [`MemoryIdentity`] answers the OAuth and "who am I" calls from
//! registered fixtures. Both are used by tests and local development.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use ec_relate_core::{CartHandle, LineId, MerchandiseId};

use super::{
    BuyerIdentity, Cart, CartCost, CartLine, CartLineInput, CartLineUpdate, CartUserError,
    CommerceApi, Customer, CustomerAccessToken, EmailAddress, IdentityProvider, Merchandise, Money,
    ProductSnapshot, ShopifyError,
};

const UNIT_PRICE_CENTS: u64 = 1_000;
const CURRENCY: &str = "USD";

/// A failure to inject into the next commerce call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Timeout,
    UserError(String),
}

#[derive(Debug, Clone)]
struct StoredLine {
    id: String,
    merchandise: MerchandiseId,
    quantity: u32,
}

#[derive(Debug, Clone, Default)]
struct StoredCart {
    lines: Vec<StoredLine>,
    buyer: Option<BuyerIdentity>,
}

#[derive(Default)]
struct CommerceState {
    next_id: u64,
    carts: HashMap<String, StoredCart>,
    customers: HashMap<String, BuyerIdentity>,
    calls: Vec<&'static str>,
    fail_next: Option<InjectedFailure>,
}

impl CommerceState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, call: &'static str) -> Result<(), ShopifyError> {
        self.calls.push(call);
        match self.fail_next.take() {
            None => Ok(()),
            Some(InjectedFailure::Timeout) => Err(ShopifyError::Timeout),
            Some(InjectedFailure::UserError(message)) => {
                Err(ShopifyError::UserErrors(vec![CartUserError {
                    code: Some("INVALID".to_string()),
                    field: Some(vec!["lines".to_string()]),
                    message,
                }]))
            }
        }
    }

    fn add(&mut self, handle: &str, lines: Vec<CartLineInput>) -> Result<(), ShopifyError> {
        for input in lines {
            let existing = self
                .carts
                .get_mut(handle)
                .ok_or(ShopifyError::CartNotFound)?
                .lines
                .iter_mut()
                .find(|l| l.merchandise == input.merchandise_id);
            if let Some(line) = existing {
                line.quantity = line.quantity.saturating_add(input.quantity.get());
                continue;
            }
            let id = format!("gid://shopify/CartLine/line-{}", self.next_id());
            self.carts
                .get_mut(handle)
                .ok_or(ShopifyError::CartNotFound)?
                .lines
                .push(StoredLine {
                    id,
                    merchandise: input.merchandise_id,
                    quantity: input.quantity.get(),
                });
        }
        Ok(())
    }

    fn cart_mut(&mut self, handle: &CartHandle) -> Result<&mut StoredCart, ShopifyError> {
        self.carts
            .get_mut(handle.as_str())
            .ok_or(ShopifyError::CartNotFound)
    }

    fn render(&self, handle: &str) -> Result<Cart, ShopifyError> {
        let stored = self.carts.get(handle).ok_or(ShopifyError::CartNotFound)?;
        let id = CartHandle::parse(handle).map_err(|_| ShopifyError::MissingData("cart id"))?;
        let units: u64 = stored.lines.iter().map(|l| u64::from(l.quantity)).sum();
        let subtotal = money(units * UNIT_PRICE_CENTS);
        Ok(Cart {
            checkout_url: format!(
                "https://shop.test/cart/c/{}",
                handle.trim_start_matches("gid://shopify/Cart/")
            ),
            id,
            buyer: stored.buyer.clone(),
            cost: CartCost {
                subtotal: Some(subtotal.clone()),
                total: Some(subtotal),
                total_tax: None,
                total_duty: None,
            },
            lines: stored.lines.iter().map(render_line).collect(),
        })
    }
}

fn money(cents: u64) -> Money {
    Money {
        amount: format!("{}.{:02}", cents / 100, cents % 100),
        currency_code: CURRENCY.to_string(),
    }
}

fn render_line(line: &StoredLine) -> CartLine {
    CartLine {
        id: line.id.clone(),
        quantity: line.quantity,
        merchandise: Merchandise {
            id: line.merchandise.to_string(),
            title: "Default Title".to_string(),
            quantity_available: None,
            price: money(UNIT_PRICE_CENTS),
            product: ProductSnapshot {
                id: "gid://shopify/Product/1".to_string(),
                title: "Product".to_string(),
                handle: "product".to_string(),
                featured_image: None,
            },
        },
    }
}

/// In-memory [`CommerceApi`].
#[derive(Default)]
pub struct MemoryCommerce {
    state: Mutex<CommerceState>,
}

impl MemoryCommerce {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CommerceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `access_token` resolve to a customer in buyer identity updates.
    pub fn register_customer(&self, access_token: &str, customer_id: &str, email: &str) {
        self.lock().customers.insert(
            access_token.to_string(),
            BuyerIdentity {
                customer_id: customer_id.to_string(),
                email: Some(email.to_string()),
            },
        );
    }

    /// Fail the next call.
    pub fn fail_next(&self, failure: InjectedFailure) {
        self.lock().fail_next = Some(failure);
    }

    /// Forget a cart, as the platform does once it expires or converts.
    pub fn expire(&self, handle: &CartHandle) {
        self.lock().carts.remove(handle.as_str());
    }

    /// Names of every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    #[must_use]
    pub fn cart_count(&self) -> usize {
        self.lock().carts.len()
    }

    #[must_use]
    pub fn buyer_of(&self, handle: &CartHandle) -> Option<BuyerIdentity> {
        self.lock()
            .carts
            .get(handle.as_str())
            .and_then(|c| c.buyer.clone())
    }
}

#[async_trait]
impl CommerceApi for MemoryCommerce {
    async fn create_cart(
        &self,
        lines: Vec<CartLineInput>,
        customer_access_token: Option<&str>,
    ) -> Result<Cart, ShopifyError> {
        let mut state = self.lock();
        state.record("create_cart")?;
        let handle = format!("gid://shopify/Cart/mem-{}", state.next_id());
        let buyer = customer_access_token.and_then(|t| state.customers.get(t).cloned());
        state.carts.insert(
            handle.clone(),
            StoredCart {
                lines: Vec::new(),
                buyer,
            },
        );
        state.add(&handle, lines)?;
        state.render(&handle)
    }

    async fn get_cart(&self, cart: &CartHandle) -> Result<Option<Cart>, ShopifyError> {
        let mut state = self.lock();
        state.record("get_cart")?;
        if !state.carts.contains_key(cart.as_str()) {
            return Ok(None);
        }
        state.render(cart.as_str()).map(Some)
    }

    async fn add_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineInput>,
    ) -> Result<Cart, ShopifyError> {
        let mut state = self.lock();
        state.record("add_lines")?;
        state.cart_mut(cart)?;
        state.add(cart.as_str(), lines)?;
        state.render(cart.as_str())
    }

    async fn update_lines(
        &self,
        cart: &CartHandle,
        lines: Vec<CartLineUpdate>,
    ) -> Result<Cart, ShopifyError> {
        let mut state = self.lock();
        state.record("update_lines")?;
        let stored = state.cart_mut(cart)?;
        for update in lines {
            if let Some(line) = stored.lines.iter_mut().find(|l| l.id == update.id.as_str()) {
                line.quantity = update.quantity.get();
            }
        }
        stored.lines.retain(|l| l.quantity > 0);
        state.render(cart.as_str())
    }

    async fn remove_lines(
        &self,
        cart: &CartHandle,
        line_ids: Vec<LineId>,
    ) -> Result<Cart, ShopifyError> {
        let mut state = self.lock();
        state.record("remove_lines")?;
        let stored = state.cart_mut(cart)?;
        stored
            .lines
            .retain(|l| !line_ids.iter().any(|id| id.as_str() == l.id));
        state.render(cart.as_str())
    }

    async fn update_buyer_identity(
        &self,
        cart: &CartHandle,
        customer_access_token: &str,
    ) -> Result<Cart, ShopifyError> {
        let mut state = self.lock();
        state.record("update_buyer_identity")?;
        state.cart_mut(cart)?;
        let buyer = state
            .customers
            .get(customer_access_token)
            .cloned()
            .ok_or_else(|| {
                ShopifyError::UserErrors(vec![CartUserError {
                    code: Some("INVALID".to_string()),
                    field: Some(vec!["buyerIdentity".to_string(), "customerAccessToken".to_string()]),
                    message: "Customer access token is invalid".to_string(),
                }])
            })?;
        state.cart_mut(cart)?.buyer = Some(buyer);
        state.render(cart.as_str())
    }
}

#[derive(Default)]
struct IdentityState {
    codes: HashMap<String, CustomerAccessToken>,
    refreshes: HashMap<String, CustomerAccessToken>,
    customers: HashMap<String, Customer>,
    calls: Vec<&'static str>,
}

/// In-memory [`IdentityProvider`].
#[derive(Default)]
pub struct MemoryIdentity {
    state: Mutex<IdentityState>,
}

impl MemoryIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A token that never expires, issued at `obtained_at`.
    #[must_use]
    pub fn token(access_token: &str) -> CustomerAccessToken {
        CustomerAccessToken {
            access_token: access_token.to_string(),
            id_token: Some(format!("id-{access_token}")),
            refresh_token: Some(format!("refresh-{access_token}")),
            expires_in: None,
            obtained_at: 0,
        }
    }

    /// Make `code` exchangeable for `token`.
    pub fn register_code(&self, code: &str, token: CustomerAccessToken) {
        self.lock().codes.insert(code.to_string(), token);
    }

    /// Make `refresh_token` exchangeable for `token`.
    pub fn register_refresh(&self, refresh_token: &str, token: CustomerAccessToken) {
        self.lock().refreshes.insert(refresh_token.to_string(), token);
    }

    /// Make `access_token` resolve to a customer with this id and email.
    pub fn register_customer(&self, access_token: &str, customer_id: &str, email: &str) {
        self.lock().customers.insert(
            access_token.to_string(),
            Customer {
                id: customer_id.to_string(),
                email_address: Some(EmailAddress {
                    email_address: Some(email.to_string()),
                }),
                first_name: None,
                last_name: None,
            },
        );
    }

    #[must_use]
    pub fn count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "https://identity.test/authorize?redirect_uri={}&state={}&nonce={}&code_challenge={}",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
            urlencoding::encode(code_challenge),
        )
    }

    fn logout_url(&self, id_token: &str, post_logout_redirect_uri: &str) -> String {
        format!(
            "https://identity.test/logout?id_token_hint={}&post_logout_redirect_uri={}",
            urlencoding::encode(id_token),
            urlencoding::encode(post_logout_redirect_uri),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<CustomerAccessToken, ShopifyError> {
        let mut state = self.lock();
        state.calls.push("exchange_code");
        state
            .codes
            .remove(code)
            .ok_or_else(|| ShopifyError::OAuth("invalid_grant".to_string()))
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<CustomerAccessToken, ShopifyError> {
        let mut state = self.lock();
        state.calls.push("refresh_token");
        state
            .refreshes
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| ShopifyError::OAuth("invalid_grant".to_string()))
    }

    async fn current_customer(&self, access_token: &str) -> Result<Customer, ShopifyError> {
        let mut state = self.lock();
        state.calls.push("current_customer");
        state
            .customers
            .get(access_token)
            .cloned()
            .ok_or_else(|| ShopifyError::OAuth("invalid token".to_string()))
    }
}
