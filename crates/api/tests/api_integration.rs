//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use domain::OrderService;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderRepository;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_repo(repo: InMemoryOrderRepository) -> axum::Router {
    let state = Arc::new(api::AppState::new(OrderService::new(repo)));
    api::create_app(state, get_metrics_handle(), Duration::from_secs(30))
}

fn setup() -> axum::Router {
    setup_with_repo(InMemoryOrderRepository::new())
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn widget_order() -> serde_json::Value {
    serde_json::json!({
        "customer_name": "John Doe",
        "items": [{
            "product_name": "Widget",
            "quantity": 2,
            "price": 50.25
        }]
    })
}

async fn create_order(app: &axum::Router) -> i64 {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/orders", widget_order()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app.oneshot(empty_request("GET", "/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_order_routes_are_versioned() {
    let app = setup();

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/orders"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(empty_request("GET", &format!("{}/orders", api::API_PREFIX)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_order() {
    let app = setup();

    let response = app
        .oneshot(json_request("POST", "/api/v1/orders", widget_order()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Order created successfully");
    assert!(json["id"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_create_and_get_order() {
    let app = setup();
    let order_id = create_order(&app).await;

    let response = app
        .oneshot(empty_request("GET", &format!("/api/v1/orders/{order_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let order = &json["data"];
    assert_eq!(order["id"], order_id);
    assert_eq!(order["customer_name"], "John Doe");
    assert_eq!(order["total_amount"], 100.5);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["order_id"], order_id);
}

#[tokio::test]
async fn test_create_order_validation_error() {
    let app = setup();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/orders",
            serde_json::json!({ "customer_name": "", "items": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Customer name is required");
}

#[tokio::test]
async fn test_create_order_malformed_body() {
    let app = setup();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/orders",
            serde_json::json!({ "customer_name": 42 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();

    let response = app
        .oneshot(empty_request("GET", "/api/v1/orders/999"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_order_ids() {
    let app = setup();

    for uri in ["/api/v1/orders/abc", "/api/v1/orders/0", "/api/v1/orders/-4"] {
        let response = app
            .clone()
            .oneshot(empty_request("GET", uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");
    }
}

#[tokio::test]
async fn test_update_status() {
    let app = setup();
    let order_id = create_order(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/orders/{order_id}/status"),
            serde_json::json!({ "status": "completed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Order updated successfully");

    let response = app
        .oneshot(empty_request("GET", &format!("/api/v1/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["data"]["status"], "completed");
}

#[tokio::test]
async fn test_update_status_rejects_unknown_status() {
    let app = setup();
    let order_id = create_order(&app).await;

    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/orders/{order_id}/status"),
            serde_json::json!({ "status": "shipped" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_then_get() {
    let app = setup();
    let order_id = create_order(&app).await;

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/v1/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/v1/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(empty_request("DELETE", &format!("/api/v1/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders() {
    let app = setup();

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/v1/orders"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 0);
    assert_eq!(json["total"], 0);
    assert_eq!(json["page"], 1);
    assert_eq!(json["size"], 10);
    assert_eq!(json["total_pages"], 0);

    for _ in 0..3 {
        create_order(&app).await;
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/v1/orders?page=2&size=2"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["total"], 3);
    assert_eq!(json["total_pages"], 2);

    let response = app
        .oneshot(empty_request("GET", "/api/v1/orders?page=abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() {
    let app = setup();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = app.oneshot(empty_request("GET", "/healthz")).await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
async fn test_timeout_header_yields_request_timeout() {
    let repo =
        InMemoryOrderRepository::new().with_statement_latency(Duration::from_millis(200));
    let app = setup_with_repo(repo.clone());

    let mut request = json_request("POST", "/api/v1/orders", widget_order());
    request
        .headers_mut()
        .insert("x-timeout-duration", "50ms".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(repo.order_count().await, 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create_order(&app).await;

    let response = app.oneshot(empty_request("GET", "/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
