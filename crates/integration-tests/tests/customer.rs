//! Customer login, validation gate, binding and logout over HTTP.

use axum::http::StatusCode;
use ec_relate_core::CartHandle;
use ec_relate_integration_tests::{BASE_URL, Browser, TestApp, TestResult, variant};
use serde_json::{Value, json};

const CUSTOMER_ID: &str = "gid://shopify/Customer/501";

/// Complete a login through the JSON exchange endpoint.
async fn exchange(browser: &mut Browser, code: &str, return_to: &str) -> TestResult<Value> {
    let state = browser.start_login(return_to).await?;
    let response = browser
        .post_json(
            "/api/v1/customer-token-exchange",
            &json!({ "code": code, "state": state }),
        )
        .await?;
    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

async fn gate(browser: &mut Browser) -> TestResult<Value> {
    let response = browser
        .post_json("/api/v1/validate-customer", &json!({}))
        .await?;
    assert_eq!(response.status, StatusCode::OK);
    response.json()
}

#[tokio::test]
async fn login_redirects_to_provider_with_pkce() -> TestResult {
    let app = TestApp::new();
    let mut browser = app.browser();

    let response = browser.get("/auth/shopify/login?return_to=%2Fcart").await?;
    assert!(response.status.is_redirection());
    let location = response.location().ok_or("no redirect")?;
    let url = url::Url::parse(location)?;
    let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

    assert_eq!(url.host_str(), Some("identity.test"));
    assert_eq!(
        params.get("redirect_uri").map(String::as_str),
        Some("https://shop.test/auth/shopify/callback")
    );
    assert_eq!(params.get("code_challenge").map(String::len), Some(43));
    assert!(params.get("state").is_some_and(|s| s.contains('.')));
    Ok(())
}

#[tokio::test]
async fn callback_stores_token_and_returns_to_origin_page() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "shopper@example.com");
    let mut browser = app.browser();

    let state = browser.start_login("/collections/all?page=2").await?;
    let response = browser
        .get(&format!(
            "/auth/shopify/callback?code=code-1&state={}",
            urlencoding::encode(&state)
        ))
        .await?;
    assert!(response.status.is_redirection());
    assert_eq!(response.location(), Some("/collections/all?page=2"));
    assert_eq!(app.identity.count("exchange_code"), 1);

    // No host account: the gate reports an anonymous visitor.
    browser.fetch_nonce().await?;
    assert_eq!(gate(&mut browser).await?["status"], "anonymous");
    assert_eq!(app.identity.count("current_customer"), 1);
    Ok(())
}

#[tokio::test]
async fn foreign_return_urls_fall_back_to_root() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "shopper@example.com");
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let body = exchange(&mut browser, "code-1", "https://evil.test/steal").await?;
    assert_eq!(body["returnUrl"], "/");
    Ok(())
}

#[tokio::test]
async fn mismatched_state_aborts_without_token() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "shopper@example.com");
    let mut browser = app.browser();

    let state = browser.start_login("/cart").await?;
    let tampered = format!("{state}x");
    let response = browser
        .get(&format!(
            "/auth/shopify/callback?code=code-1&state={}",
            urlencoding::encode(&tampered)
        ))
        .await?;
    assert_ne!(response.location(), Some("/cart"));
    assert_eq!(response.location(), Some("/?login_error=invalid_state"));
    assert_eq!(app.identity.count("exchange_code"), 0);

    // The pending login was consumed, so the genuine state fails too.
    let retry = browser
        .get(&format!(
            "/auth/shopify/callback?code=code-1&state={}",
            urlencoding::encode(&state)
        ))
        .await?;
    assert_eq!(retry.location(), Some("/?login_error=invalid_state"));

    browser.fetch_nonce().await?;
    assert_eq!(gate(&mut browser).await?["status"], "anonymous");
    assert_eq!(app.identity.count("current_customer"), 0, "no token was stored");
    Ok(())
}

#[tokio::test]
async fn replayed_exchange_is_rejected() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "shopper@example.com");
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let state = browser.start_login("/").await?;
    let request = json!({ "code": "code-1", "state": state });
    let first = browser
        .post_json("/api/v1/customer-token-exchange", &request)
        .await?;
    assert_eq!(first.status, StatusCode::OK);

    let replay = browser
        .post_json("/api/v1/customer-token-exchange", &request)
        .await?;
    assert_eq!(replay.status, StatusCode::FORBIDDEN);
    assert_eq!(replay.json()?["code"], "invalid_state");
    assert_eq!(app.identity.count("exchange_code"), 1);
    Ok(())
}

#[tokio::test]
async fn exchange_requires_code_and_state() -> TestResult {
    let app = TestApp::new();
    let mut browser = app.browser();
    browser.fetch_nonce().await?;
    browser.start_login("/").await?;

    let response = browser
        .post_json("/api/v1/customer-token-exchange", &json!({ "code": "c" }))
        .await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn provider_denial_redirects_with_error() -> TestResult {
    let app = TestApp::new();
    let mut browser = app.browser();
    browser.start_login("/cart").await?;

    let response = browser
        .get("/auth/shopify/callback?error=access_denied&error_description=nope")
        .await?;
    assert_eq!(response.location(), Some("/?login_error=denied"));
    assert_eq!(app.identity.count("exchange_code"), 0);
    Ok(())
}

#[tokio::test]
async fn exchange_binds_the_anonymous_cart_once() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "shopper@example.com");
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    browser
        .cart(&json!({ "mode": "into_cart", "productId": variant(1) }))
        .await?;
    let handle = CartHandle::parse(&browser.cart_cookie().ok_or("no cart cookie")?)?;

    let body = exchange(&mut browser, "code-1", "/cart").await?;
    assert_eq!(body["bound"], true);
    assert_eq!(body["cartId"], handle.as_str());
    assert_eq!(
        app.commerce.buyer_of(&handle).map(|b| b.customer_id),
        Some(CUSTOMER_ID.to_string())
    );
    assert_eq!(browser.cart_cookie(), Some(handle.to_string()), "anonymous cart stays in the cookie");

    // The cart now reports a buyer, so later loads never bind again.
    for _ in 0..3 {
        let read = browser.cart(&json!({ "mode": "read" })).await?.json()?;
        assert_eq!(read["buyerId"]["customerId"], CUSTOMER_ID);
    }
    assert_eq!(app.commerce.count("update_buyer_identity"), 1);
    Ok(())
}

#[tokio::test]
async fn login_with_cookie_cart_binds_on_next_reconcile() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-c", "tok-c", CUSTOMER_ID, "Carol@Example.com");
    let user = app.create_user("carol@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    // Customer login first, with no cart yet: nothing to bind.
    let body = exchange(&mut browser, "code-c", "/").await?;
    assert_eq!(body["bound"], false);

    browser
        .cart(&json!({ "mode": "into_cart", "productId": variant(4), "quantity": 2 }))
        .await?;
    let handle = browser.cart_cookie().ok_or("no cart cookie")?;
    assert_eq!(app.commerce.count("update_buyer_identity"), 0);

    browser.log_in("carol@example.com").await?;
    let gate_view = gate(&mut browser).await?;
    assert_eq!(gate_view["status"], "bound");
    assert_eq!(gate_view["customerId"], CUSTOMER_ID);

    let response = browser.cart(&json!({ "mode": "read" })).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.clears_cart_cookie());
    let body = response.json()?;
    assert_eq!(body["cartId"], handle.as_str());
    assert_eq!(body["buyerId"]["customerId"], CUSTOMER_ID);
    assert_eq!(body["itemCount"], 2);
    assert!(browser.cart_cookie().is_none());

    // The handle moved to the user: a later load finds it without the cookie.
    let again = browser
        .cart(&json!({ "mode": "read", "wp_user_id": user.id.as_i64() }))
        .await?
        .json()?;
    assert_eq!(again["cartId"], handle.as_str());
    assert_eq!(app.commerce.count("update_buyer_identity"), 1);
    Ok(())
}

#[tokio::test]
async fn explicit_bind_requires_login_and_is_idempotent() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-1", "tok-1", CUSTOMER_ID, "dana@example.com");
    app.create_user("dana@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let anonymous = browser.post_json("/api/v1/cart/bind", &json!({})).await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    browser.log_in("dana@example.com").await?;
    let no_token = browser.post_json("/api/v1/cart/bind", &json!({})).await?;
    assert_eq!(no_token.status, StatusCode::BAD_REQUEST);

    exchange(&mut browser, "code-1", "/").await?;
    assert_eq!(gate(&mut browser).await?["status"], "bound");
    let cart = browser
        .cart(&json!({ "mode": "into_cart", "productId": variant(2) }))
        .await?
        .json()?;
    let cart_id = cart["cartId"].as_str().ok_or("no cartId")?;
    // Reconciling already attached the customer.
    assert_eq!(cart["buyerId"]["customerId"], CUSTOMER_ID);
    let calls = app.commerce.count("update_buyer_identity");

    let first = browser
        .post_json("/api/v1/cart/bind", &json!({ "cartId": cart_id }))
        .await?
        .json()?;
    assert_eq!(first["performed"], false);
    assert_eq!(first["cartId"], cart_id);

    let known = browser
        .post_json(
            "/api/v1/cart/bind",
            &json!({ "cartId": cart_id, "buyerId": { "customerId": CUSTOMER_ID } }),
        )
        .await?
        .json()?;
    assert_eq!(known["performed"], false);
    assert_eq!(known["buyerId"]["customerId"], CUSTOMER_ID);
    assert_eq!(app.commerce.count("update_buyer_identity"), calls);
    Ok(())
}

#[tokio::test]
async fn customer_with_another_email_is_not_bound_to_host_cart() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-x", "tok-x", CUSTOMER_ID, "stranger@example.com");
    app.create_user("pat@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;
    browser.log_in("pat@example.com").await?;

    let body = exchange(&mut browser, "code-x", "/").await?;
    assert_eq!(body["bound"], false);

    let added = browser
        .cart(&json!({ "mode": "into_cart", "productId": variant(5) }))
        .await?;
    assert_eq!(added.status, StatusCode::OK);
    let added = added.json()?;
    assert!(added["buyerId"].is_null(), "no customer data before the gate");
    let cart_id = added["cartId"].as_str().ok_or("no cartId")?.to_string();

    assert_eq!(gate(&mut browser).await?["status"], "anonymous");

    let read = browser.cart(&json!({ "mode": "read" })).await?.json()?;
    assert!(read["buyerId"].is_null());

    let bind = browser
        .post_json("/api/v1/cart/bind", &json!({ "cartId": cart_id }))
        .await?;
    assert_eq!(bind.status, StatusCode::FORBIDDEN);
    assert_eq!(bind.json()?["code"], "customer_mismatch");
    assert_eq!(app.commerce.count("update_buyer_identity"), 0);
    Ok(())
}

#[tokio::test]
async fn pending_registration_is_promoted_by_matching_login() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-p", "tok-p", CUSTOMER_ID, "Pat@Example.com");
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let registered = browser
        .post_json(
            "/api/v1/register",
            &json!({
                "email": "pat@example.com",
                "name": "Pat",
                "password": ec_relate_integration_tests::PASSWORD,
            }),
        )
        .await?;
    assert_eq!(registered.status, StatusCode::OK);
    assert_eq!(registered.json()?["status"], "pending");
    assert_eq!(app.db.user_count(), 0);

    exchange(&mut browser, "code-p", "/").await?;
    let promoted = gate(&mut browser).await?;
    assert_eq!(promoted["status"], "promoted");
    assert_eq!(promoted["reload"], true);
    assert_eq!(app.db.user_count(), 1);

    // Now logged in as the promoted user.
    assert_eq!(gate(&mut browser).await?["status"], "bound");
    assert_eq!(app.db.user_count(), 1, "promotion happens at most once");

    // The registration password carried over.
    let mut other = app.browser();
    other.fetch_nonce().await?;
    other.log_in("pat@example.com").await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_conflicts() -> TestResult {
    let app = TestApp::new();
    app.create_user("taken@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let response = browser
        .post_json(
            "/api/v1/register",
            &json!({
                "email": "taken@example.com",
                "name": "Someone",
                "password": ec_relate_integration_tests::PASSWORD,
            }),
        )
        .await?;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json()?["success"], false);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> TestResult {
    let app = TestApp::new();
    app.create_user("erin@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;

    let response = browser
        .post_json(
            "/api/v1/login",
            &json!({ "email": "erin@example.com", "password": "not the password" }),
        )
        .await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn signed_logout_flushes_everything() -> TestResult {
    let app = TestApp::new();
    app.register_customer("code-l", "tok-l", CUSTOMER_ID, "lee@example.com");
    app.create_user("lee@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;
    browser.log_in("lee@example.com").await?;
    exchange(&mut browser, "code-l", "/").await?;
    browser.set_cookie("shopify_cart_id", "gid%3A%2F%2Fshopify%2FCart%2Fleftover");

    let link = browser
        .post_json("/api/v1/wp-logout-redirect", &json!({ "returnUrl": "/goodbye" }))
        .await?
        .json()?;
    let url = link["url"].as_str().ok_or("no url")?;
    let path = url.strip_prefix(BASE_URL).ok_or("link is not on this site")?;

    let response = browser.get(path).await?;
    assert!(response.status.is_redirection());
    assert!(response.clears_cart_cookie());
    let provider = response.location().ok_or("no redirect")?;
    assert!(provider.starts_with("https://identity.test/logout?id_token_hint=id-tok-l"));
    assert!(provider.contains(&urlencoding::encode(
        "https://shop.test/auth/logout/complete?return_to=%2Fgoodbye"
    ).into_owned()));

    let complete = browser.get("/auth/logout/complete?return_to=%2Fgoodbye").await?;
    assert_eq!(complete.location(), Some("/goodbye?logoutCompleted=1"));

    browser.fetch_nonce().await?;
    let bind = browser.post_json("/api/v1/cart/bind", &json!({})).await?;
    assert_eq!(bind.status, StatusCode::UNAUTHORIZED, "host session is gone");
    assert_eq!(gate(&mut browser).await?["status"], "anonymous");
    Ok(())
}

#[tokio::test]
async fn tampered_logout_link_is_refused() -> TestResult {
    let app = TestApp::new();
    app.create_user("kim@example.com").await?;
    let mut browser = app.browser();
    browser.fetch_nonce().await?;
    browser.log_in("kim@example.com").await?;

    let link = browser
        .post_json("/api/v1/wp-logout-redirect", &json!({ "returnUrl": "/" }))
        .await?
        .json()?;
    let url = link["url"].as_str().ok_or("no url")?;
    let path = url.strip_prefix(BASE_URL).ok_or("link is not on this site")?;
    let tampered = path.replace("return_to=%2F", "return_to=%2Fadmin");

    let response = browser.get(&tampered).await?;
    assert_eq!(response.location(), Some("/?logout_error=invalid_link"));

    let bind = browser.post_json("/api/v1/cart/bind", &json!({})).await?;
    assert_ne!(bind.status, StatusCode::UNAUTHORIZED, "still logged in");
    Ok(())
}
