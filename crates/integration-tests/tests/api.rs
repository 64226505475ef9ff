//! REST viewsets: CRUD, filters, pagination, CSV and the schema.

#![allow(clippy::unwrap_used)]

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};

use mysite_integration_tests::TestApp;

async fn upload(app: &TestApp, path: &str, csv: Vec<u8>) -> reqwest::Response {
    let form = Form::new().part(
        "file",
        Part::bytes(csv)
            .file_name("upload.csv")
            .mime_str("text/csv")
            .unwrap(),
    );
    app.client()
        .post(app.url(path))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_product_crud() {
    let app = TestApp::spawn().await;
    let client = app.client();

    let response = client
        .post(app.url("/api/products/"))
        .json(&json!({"name": "Kettle", "price": "19.99", "discount": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["name"], "Kettle");
    assert_eq!(created["price"], "19.99");
    let pk = created["pk"].as_i64().unwrap();

    let response = client
        .patch(app.url(&format!("/api/products/{pk}/")))
        .json(&json!({"description": "Boils water"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let patched: Value = response.json().await.unwrap();
    assert_eq!(patched["description"], "Boils water");
    assert_eq!(patched["price"], "19.99");

    let response = client
        .delete(app.url(&format!("/api/products/{pk}/")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(app.url(&format!("/api/products/{pk}/")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_payload_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client()
        .post(app.url("/api/products/"))
        .json(&json!({"name": "", "price": "lots", "discount": 300}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let errors: Value = response.json().await.unwrap();
    assert!(errors.get("price").is_some());
    assert!(errors.get("discount").is_some());
}

#[tokio::test]
async fn test_pagination_envelope() {
    let app = TestApp::spawn_with(|config| config.api_page_size = 2).await;
    for name in ["A", "B", "C"] {
        app.create_product(name, "1.00", None).await;
    }
    let client = app.client();

    let first: Value = client
        .get(app.url("/api/products/?ordering=name"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["count"], 3);
    assert_eq!(first["results"].as_array().unwrap().len(), 2);
    assert!(first["previous"].is_null());
    assert!(first["next"].as_str().unwrap().contains("page=2"));

    let second: Value = client
        .get(app.url("/api/products/?ordering=name&page=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["results"][0]["name"], "C");
    assert!(second["next"].is_null());

    for bad in ["page=3", "page=zero"] {
        let response = client
            .get(app.url(&format!("/api/products/?{bad}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{bad}");
    }
}

#[tokio::test]
async fn test_invalid_filter_or_ordering_is_bad_request() {
    let app = TestApp::spawn().await;
    let client = app.client();

    for query in ["ordering=created_by", "price=cheap", "archived=maybe"] {
        let response = client
            .get(app.url(&format!("/api/products/?{query}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
    }

    let response = client
        .get(app.url("/api/orders/?ordering=promocode"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_and_filters() {
    let app = TestApp::spawn().await;
    app.create_product("Red chair", "10.00", None).await;
    app.create_product("Blue table", "20.00", None).await;
    let client = app.client();

    let found: Value = client
        .get(app.url("/api/products/?search=CHAIR"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found["count"], 1);
    assert_eq!(found["results"][0]["name"], "Red chair");

    let priced: Value = client
        .get(app.url("/api/products/?price=20.00"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(priced["count"], 1);
    assert_eq!(priced["results"][0]["name"], "Blue table");
}

#[tokio::test]
async fn test_products_csv_round_trip() {
    let source = TestApp::spawn().await;
    source.create_product("Chair", "123.45", None).await;
    source.create_product("Sofa, large", "999.00", None).await;

    let exported = source
        .client()
        .get(source.url("/api/products/download_csv/"))
        .send()
        .await
        .unwrap();
    assert_eq!(exported.status(), StatusCode::OK);
    assert!(
        exported
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("products-export.csv")
    );
    let csv = exported.bytes().await.unwrap().to_vec();

    let target = TestApp::spawn().await;
    let response = upload(&target, "/api/products/upload_csv/", csv.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created.as_array().unwrap().len(), 2);
    assert_eq!(created[1]["name"], "Sofa, large");
    assert_eq!(created[0]["description"], "About Chair");

    let reexported = target
        .client()
        .get(target.url("/api/products/download_csv/"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(reexported.to_vec(), csv);
}

#[tokio::test]
async fn test_csv_upload_is_all_or_nothing() {
    let app = TestApp::spawn().await;
    let csv = b"name,description,price,discount\nGood,,1.00,0\nBad,,not-a-price,0\n".to_vec();

    let response = upload(&app, "/api/products/upload_csv/", csv).await;
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
async fn test_order_api_with_products() {
    let app = TestApp::spawn().await;
    let buyer = app.create_user("buyer", false, false).await;
    let lamp = app.create_product("Lamp", "5.00", None).await;
    let rug = app.create_product("Rug", "50.00", None).await;
    let client = app.client();

    let response = client
        .post(app.url("/api/orders/"))
        .json(&json!({
            "delivery_address": "Oak 3",
            "promocode": "WELCOME",
            "user": buyer.id.as_i32(),
            "products": [lamp.id.as_i32(), rug.id.as_i32()],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let order: Value = response.json().await.unwrap();
    assert_eq!(order["products"], json!([lamp.id.as_i32(), rug.id.as_i32()]));

    let filtered: Value = client
        .get(app.url(&format!("/api/orders/?products={}", rug.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filtered["count"], 1);
    assert_eq!(filtered["results"][0]["user"], buyer.id.as_i32());

    let response = client
        .get(app.url("/api/orders/download_csv/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let csv = response.text().await.unwrap();
    assert!(csv.starts_with("delivery_address,promocode,created_at,user,products"));
    assert!(csv.contains("Oak 3"));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::spawn().await;

    let response = app.client().get(app.url("/api/schema/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = response.json().await.unwrap();
    assert!(doc["paths"]["/api/products/"].is_object());
    assert!(doc["paths"]["/api/orders/upload_csv/"].is_object());
}
