//! Export and page caches: stale within the TTL, fresh after it.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use mysite_integration_tests::TestApp;
use mysite_web::config::CacheBackend;
use mysite_web::models::OrderFields;

async fn get_json(app: &TestApp, path: &str) -> Value {
    let response = app.client().get(app.url(path)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK, "{path}");
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_products_export_is_cached_until_expiry() {
    let app = TestApp::spawn_with(|config| config.export_cache_ttl = Duration::from_secs(1)).await;
    app.create_product("Chair", "10.00", None).await;

    let first = get_json(&app, "/products/export/").await;
    assert_eq!(first["products"][0]["name"], "Chair");
    assert_eq!(first["products"][0]["price"], "10.00");

    app.create_product("Table", "20.00", None).await;
    let cached = get_json(&app, "/products/export/").await;
    assert_eq!(cached, first);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let fresh = get_json(&app, "/products/export/").await;
    assert_eq!(fresh["products"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_user_orders_export_is_cached_per_user() {
    let app = TestApp::spawn().await;
    let alice = app.create_user("alice", false, false).await;
    let bob = app.create_user("bob", false, false).await;
    let lamp = app.create_product("Lamp", "5.00", None).await;

    let order = |user_id, address: &str| OrderFields {
        delivery_address: address.to_owned(),
        promocode: String::new(),
        user_id,
        products: vec![lamp.id],
    };
    app.repos.orders.create(&order(alice.id, "Alice lane")).await.unwrap();
    app.repos.orders.create(&order(bob.id, "Bob road")).await.unwrap();

    let alice_path = format!("/users/{}/orders/export/", alice.id);
    let bob_path = format!("/users/{}/orders/export/", bob.id);

    let alice_first = get_json(&app, &alice_path).await;
    let bob_first = get_json(&app, &bob_path).await;
    assert_eq!(alice_first["orders"][0]["delivery_address"], "Alice lane");
    assert_eq!(bob_first["orders"][0]["delivery_address"], "Bob road");
    assert_eq!(alice_first["orders"][0]["products"][0], "Lamp");

    app.repos.orders.create(&order(alice.id, "Second")).await.unwrap();
    assert_eq!(get_json(&app, &alice_path).await, alice_first);

    let missing = app
        .client()
        .get(app.url("/users/999/orders/export/"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_disabled_cache_always_recomputes() {
    let app = TestApp::spawn_with(|config| config.cache_backend = CacheBackend::None).await;
    app.create_product("Chair", "10.00", None).await;

    let first = get_json(&app, "/products/export/").await;
    app.create_product("Table", "20.00", None).await;
    let second = get_json(&app, "/products/export/").await;

    assert_eq!(first["products"].as_array().unwrap().len(), 1);
    assert_eq!(second["products"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_api_product_list_is_page_cached() {
    let app = TestApp::spawn().await;
    app.create_product("Chair", "10.00", None).await;

    let first = get_json(&app, "/api/products/").await;
    app.create_product("Table", "20.00", None).await;
    let cached = get_json(&app, "/api/products/").await;
    assert_eq!(cached, first);
    assert_eq!(cached["count"], 1);

    let other_query = get_json(&app, "/api/products/?ordering=-price").await;
    assert_eq!(other_query["count"], 2);
}

#[tokio::test]
async fn test_cookie_page_is_cached() {
    let app = TestApp::spawn().await;
    let client = app.client();

    let first = client
        .get(app.url("/accounts/cookie/get/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let second = client
        .get(app.url("/accounts/cookie/get/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(first.starts_with("Cookie value: 'default value' + "));
    assert_eq!(first, second);
}
