use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use omarapay_backend::api::{router, ApiServices};
use omarapay_backend::payments::factory::ProviderSet;
use omarapay_backend::payments::providers::{MockConfig, MockProvider};
use omarapay_backend::payments::types::PaymentMethod;
use omarapay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use omarapay_backend::services::registry::ChargeRegistry;
use omarapay_backend::services::webhook_processor::WebhookProcessor;
use omarapay_backend::workers::webhook_queue::WebhookQueue;

struct TestApp {
    router: Router,
    mock: Arc<MockProvider>,
}

fn test_app() -> TestApp {
    app_for(PaymentMethod::EWallet)
}

fn app_for(method: PaymentMethod) -> TestApp {
    let mock = Arc::new(MockProvider::new(method, MockConfig::default()));
    let providers = ProviderSet::new().with_provider(mock.clone());
    let registry = Arc::new(ChargeRegistry::new());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        providers.clone(),
        registry.clone(),
        OrchestratorConfig::default(),
    ));
    let processor = Arc::new(WebhookProcessor::new(providers, registry, false));
    let (queue, _rx) = WebhookQueue::channel(8);
    TestApp {
        router: router(ApiServices {
            orchestrator,
            webhook_processor: processor,
            webhook_queue: queue,
        }),
        mock,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_then_read_a_charge() {
    let app = test_app();

    let (status, created) = send(
        &app.router,
        post_json(
            "/api/payments/ewallet",
            json!({"amount": "12.50", "currency": "php", "idempotency_key": "till-3-77"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["provider"], "mock");
    assert_eq!(created["canonical_status"], "created");
    assert_eq!(created["idempotency_key"], "till-3-77");
    let charge_id = created["charge_id"].as_str().unwrap().to_string();
    assert!(charge_id.starts_with("gc_"));
    assert!(created["hosted_checkout_url"]
        .as_str()
        .unwrap()
        .contains("amount=12.50"));

    let (status, fetched) = send(&app.router, get(&format!("/api/payments/charges/{}", charge_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["canonical_status"], "created");
    assert_eq!(fetched["terminal"], false);

    app.mock.force_status(&charge_id, "succeeded").unwrap();
    let (status, refreshed) = send(
        &app.router,
        get(&format!("/api/payments/charges/{}?refresh=true", charge_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["canonical_status"], "succeeded");
    assert_eq!(refreshed["terminal"], true);
}

#[tokio::test]
async fn idempotency_header_returns_the_original_charge() {
    let app = test_app();
    let request = || {
        Request::builder()
            .method("POST")
            .uri("/api/payments/gcash")
            .header("content-type", "application/json")
            .header("idempotency-key", "order-9001")
            .body(Body::from(json!({"amount": 250, "currency": "PHP"}).to_string()))
            .unwrap()
    };

    let (_, first) = send(&app.router, request()).await;
    let (_, second) = send(&app.router, request()).await;
    assert_eq!(first["charge_id"], second["charge_id"]);
    assert_eq!(first["idempotency_key"], "order-9001");
}

#[tokio::test]
async fn client_errors_are_reported_as_json() {
    let app = test_app();

    let (status, body) = send(&app.router, get("/api/payments/charges/gc_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "CHARGE_NOT_FOUND");

    let (status, _) = send(
        &app.router,
        post_json("/api/payments/bitcoin", json!({"amount": "1", "currency": "USD"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let malformed = Request::builder()
        .method("POST")
        .uri("/api/payments/ewallet")
        .header("content-type", "application/json")
        .body(Body::from("{\"amount\":"))
        .unwrap();
    let (status, body) = send(&app.router, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let (status, _) = send(
        &app.router,
        post_json("/api/payments/ewallet", json!({"amount": "-5", "currency": "PHP"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No card provider is configured in this app.
    let (status, body) = send(
        &app.router,
        post_json("/api/payments/card", json!({"amount": "5", "currency": "USD"})),
    )
    .await;
    assert!(status.is_server_error(), "got {}", status);
    assert_eq!(body["error"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn poll_and_cancel_endpoints() {
    let app = test_app();
    let (_, created) = send(
        &app.router,
        post_json("/api/payments/ewallet", json!({"amount": "99.00", "currency": "PHP"})),
    )
    .await;
    let charge_id = created["charge_id"].as_str().unwrap().to_string();

    let (status, polling) = send(
        &app.router,
        post_empty(&format!("/api/payments/charges/{}/poll", charge_id)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(polling["charge_id"], charge_id.as_str());

    let (status, cancelled) = send(
        &app.router,
        post_empty(&format!("/api/payments/charges/{}/cancel", charge_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["canonical_status"], "canceled");
    assert_eq!(cancelled["terminal"], true);

    let (status, polling) = send(
        &app.router,
        post_empty(&format!("/api/payments/charges/{}/poll", charge_id)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(polling["poller"], json!({"terminal": "canceled"}));
}

#[tokio::test]
async fn health_reports_degraded_when_running_on_the_mock() {
    let app = test_app();
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Degraded");
    assert_eq!(body["checks"]["payments.ewallet"]["status"], "Warning");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(get("/api/payments/charges/gc_nope"))
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn google_wallet_charge_is_verified_through_the_api() {
    let app = app_for(PaymentMethod::GoogleWallet);
    let (status, created) = send(
        &app.router,
        post_json("/api/payments/googlewallet", json!({"amount": "19.99", "currency": "USD"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["provider"], "mock");
    let charge_id = created["charge_id"].as_str().unwrap().to_string();
    assert!(charge_id.starts_with("gw_"));
    assert!(created["hosted_checkout_url"]
        .as_str()
        .unwrap()
        .starts_with("https://pay.google.com/gp/p/ui/pay"));

    let verify = format!("/api/payments/charges/{}/verify", charge_id);
    let (status, unpaid) = send(&app.router, get(&verify)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unpaid["verified"], false);
    assert_eq!(unpaid["payments"], json!([]));

    app.mock.force_status(&charge_id, "succeeded").unwrap();
    let (status, paid) = send(&app.router, get(&verify)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["verified"], true);
    assert_eq!(paid["canonical_status"], "succeeded");
    assert_eq!(paid["terminal"], true);

    let (status, body) = send(
        &app.router,
        get(&format!("/api/payments/charges/{}/verify/onchain", charge_id)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "CONFIGURATION_ERROR");
}
