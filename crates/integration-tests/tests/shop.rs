//! Product and order pages: creation, archiving, ownership and access rules.

#![allow(clippy::unwrap_used)]

use reqwest::StatusCode;
use serde_json::Value;

use mysite_integration_tests::TestApp;
use mysite_web::authz::perms;

fn location(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_create_product_redirects_and_lists_it() {
    let app = TestApp::spawn().await;
    let user = app.create_user("maker", false, false).await;
    app.grant(&user, &[perms::ADD_PRODUCT]).await;
    let client = app.login("maker").await;

    let response = client
        .post(app.url("/products/create/"))
        .form(&[
            ("name", "Chair"),
            ("price", "123.45"),
            ("description", "A good chair"),
            ("discount", "10"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/products/");

    let page = client
        .get(app.url("/products/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("Chair"));

    let stored = app
        .repos
        .products
        .list(&mysite_web::db::ProductQuery::active())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].created_by, Some(user.id));
    assert_eq!(stored[0].discount.percent(), 10);
}

#[tokio::test]
async fn test_create_product_requires_permission() {
    let app = TestApp::spawn().await;
    app.create_user("visitor", false, false).await;

    let anonymous = app.client();
    let response = anonymous
        .get(app.url("/products/create/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/accounts/login/?next="));

    let client = app.login("visitor").await;
    let response = client
        .post(app.url("/products/create/"))
        .form(&[("name", "Chair"), ("price", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_product_form_rerenders_with_errors() {
    let app = TestApp::spawn().await;
    let user = app.create_user("maker", false, false).await;
    app.grant(&user, &[perms::ADD_PRODUCT]).await;
    let client = app.login("maker").await;

    let response = client
        .post(app.url("/products/create/"))
        .form(&[("name", ""), ("price", "abc"), ("discount", "150")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(
        app.repos
            .products
            .list(&mysite_web::db::ProductQuery::default())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_archived_product_hidden_from_list_but_retrievable() {
    let app = TestApp::spawn().await;
    let visible = app.create_product("Lamp", "20.00", None).await;
    let hidden = app.create_product("Old sofa", "90.00", None).await;
    app.repos.products.archive(hidden.id).await.unwrap();

    let client = app.client();
    let list = client
        .get(app.url("/products/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(list.contains(&visible.name));
    assert!(!list.contains("Old sofa"));

    let detail = client
        .get(app.url(&format!("/products/{}/", hidden.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(detail.status(), StatusCode::OK);
    assert!(detail.text().await.unwrap().contains("Old sofa"));

    let missing = client.get(app.url("/products/999/")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_creator_may_update_or_delete() {
    let app = TestApp::spawn().await;
    let owner = app.create_user("owner", false, false).await;
    let other = app.create_user("other", false, false).await;
    let both = [perms::CHANGE_PRODUCT, perms::DELETE_PRODUCT];
    app.grant(&owner, &both).await;
    app.grant(&other, &both).await;
    let product = app.create_product("Desk", "250.00", Some(owner.id)).await;

    let update = [
        ("name", "Desk v2"),
        ("price", "260.00"),
        ("description", "Sturdier"),
        ("discount", "0"),
    ];

    let intruder = app.login("other").await;
    let response = intruder
        .post(app.url(&format!("/products/{}/update/", product.id)))
        .form(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = intruder
        .post(app.url(&format!("/products/{}/delete/", product.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let creator = app.login("owner").await;
    let response = creator
        .post(app.url(&format!("/products/{}/update/", product.id)))
        .form(&update)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), format!("/products/{}/", product.id));

    let stored = app.repos.products.get(product.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Desk v2");

    let response = creator
        .post(app.url(&format!("/products/{}/archive/", product.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(app.repos.products.get(product.id).await.unwrap().unwrap().archived);

    let response = creator
        .post(app.url(&format!("/products/{}/delete/", product.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(app.repos.products.get(product.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_orders_require_login() {
    let app = TestApp::spawn().await;

    let response = app.client().get(app.url("/orders/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/accounts/login/?next=%2Forders%2F");
}

#[tokio::test]
async fn test_create_order_links_products() {
    let app = TestApp::spawn().await;
    let buyer = app.create_user("buyer", false, false).await;
    let chair = app.create_product("Chair", "10.00", None).await;
    let table = app.create_product("Table", "30.00", None).await;
    let client = app.login("buyer").await;

    let products = format!("{},{}", chair.id, table.id);
    let user = buyer.id.to_string();
    let response = client
        .post(app.url("/orders/create/"))
        .form(&[
            ("delivery_address", "Main street 1"),
            ("promocode", "SALE"),
            ("user", user.as_str()),
            ("products", products.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let orders = app
        .repos
        .orders
        .list(&mysite_web::db::OrderQuery::detailed())
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].product_ids(), vec![chair.id, table.id]);

    let page = client
        .get(app.url(&format!("/orders/{}/", orders[0].order.id)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("Main street 1"));
    assert!(page.contains("Table"));
}

#[tokio::test]
async fn test_orders_export_requires_staff() {
    let app = TestApp::spawn().await;
    let buyer = app.create_user("buyer", false, false).await;
    app.create_user("boss", true, false).await;
    let lamp = app.create_product("Lamp", "5.00", None).await;
    app.repos
        .orders
        .create(&mysite_web::models::OrderFields {
            delivery_address: "Elm 2".to_owned(),
            promocode: String::new(),
            user_id: buyer.id,
            products: vec![lamp.id],
        })
        .await
        .unwrap();

    let response = app
        .login("buyer")
        .await
        .get(app.url("/orders/export/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .login("boss")
        .await
        .get(app.url("/orders/export/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["orders"][0]["delivery_address"], "Elm 2");
    assert_eq!(body["orders"][0]["user"], buyer.id.as_i32());
    assert_eq!(body["orders"][0]["products"], serde_json::json!(["Lamp"]));
}
