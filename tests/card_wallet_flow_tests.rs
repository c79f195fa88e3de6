use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use omarapay_backend::payments::error::PaymentError;
use omarapay_backend::payments::factory::ProviderSet;
use omarapay_backend::payments::providers::{
    PayMongoConfig, PayMongoProvider, StripeConfig, StripeProvider, XenditConfig, XenditProvider,
};
use omarapay_backend::payments::signature::sign_hmac_sha256_hex;
use omarapay_backend::payments::status::CanonicalStatus;
use omarapay_backend::payments::types::{PaymentMethod, PaymentRequest, ProviderName};
use omarapay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use omarapay_backend::services::registry::{ChargeRegistry, UpdateSource};
use omarapay_backend::services::webhook_processor::{WebhookOutcome, WebhookProcessor};

/// What a fake provider saw on each create.
#[derive(Debug, Clone)]
struct SeenCreate {
    authorization: Option<String>,
    idempotency_key: Option<String>,
    fields: Value,
}

#[derive(Default)]
struct FakeProvider {
    creates: Mutex<Vec<SeenCreate>>,
    fail_first_creates: AtomicU32,
}

impl FakeProvider {
    fn seen(&self) -> Vec<SeenCreate> {
        self.creates.lock().unwrap().clone()
    }

    fn record(&self, headers: &HeaderMap, idempotency_header: &str, fields: Value) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.creates.lock().unwrap().push(SeenCreate {
            authorization: header("authorization"),
            idempotency_key: header(idempotency_header),
            fields,
        });
    }

    fn should_fail(&self) -> bool {
        self.fail_first_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn orchestrator_for(
    provider: Arc<dyn omarapay_backend::payments::provider::PaymentProvider>,
) -> PaymentOrchestrator {
    PaymentOrchestrator::new(
        ProviderSet::new().with_provider(provider),
        Arc::new(ChargeRegistry::new()),
        OrchestratorConfig::default(),
    )
}

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

async fn stripe_create(
    State(state): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.record(&headers, "idempotency-key", json!(fields));
    if fields.get("amount").map(String::as_str) == Some("99") {
        return (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({"error": {"type": "card_error", "message": "Your card was declined."}})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "id": "pi_3Nq8",
            "object": "payment_intent",
            "status": "requires_payment_method",
            "client_secret": "pi_3Nq8_secret_5f1",
            "created": 1772359200
        })),
    )
}

async fn stripe_fetch(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"id": id, "object": "payment_intent", "status": "succeeded"}))
}

#[tokio::test]
async fn card_create_hands_the_idempotency_key_to_stripe() {
    let fake = Arc::new(FakeProvider::default());
    let base_url = serve(
        Router::new()
            .route("/v1/payment_intents", post(stripe_create))
            .route("/v1/payment_intents/{id}", get(stripe_fetch))
            .with_state(fake.clone()),
    )
    .await;
    let provider = StripeProvider::new(StripeConfig {
        secret_key: "sk_test_51Hx0000".to_string(),
        base_url,
        timeout_secs: 5,
        max_retries: 0,
        ..StripeConfig::default()
    })
    .unwrap();
    let orchestrator = orchestrator_for(Arc::new(provider));

    let request = PaymentRequest::new(Decimal::new(1250, 2), "USD", PaymentMethod::Card)
        .with_metadata("description", "Table 4")
        .with_metadata("till", "3");
    let record = orchestrator
        .create_charge(request, Some("order-card-1".to_string()))
        .await
        .expect("fake stripe accepts the intent");

    assert_eq!(record.charge_id, "pi_3Nq8");
    assert_eq!(record.provider_charge.provider, ProviderName::Stripe);
    assert_eq!(
        record.provider_charge.client_secret.as_deref(),
        Some("pi_3Nq8_secret_5f1")
    );
    assert_eq!(record.status, CanonicalStatus::Created);
    assert_eq!(record.native_status, "requires_payment_method");

    let seen = fake.seen();
    assert_eq!(seen.len(), 1);
    let create = &seen[0];
    assert_eq!(create.idempotency_key.as_deref(), Some("order-card-1"));
    assert_eq!(create.authorization.as_deref(), Some("Bearer sk_test_51Hx0000"));
    assert_eq!(create.fields["amount"], "1250");
    assert_eq!(create.fields["currency"], "usd");
    assert_eq!(create.fields["payment_method_types[]"], "card");
    assert_eq!(create.fields["description"], "Table 4");
    assert_eq!(create.fields["metadata[description]"], "Table 4");
    assert_eq!(create.fields["metadata[till]"], "3");

    let refreshed = orchestrator.refresh_status("pi_3Nq8").await.unwrap();
    assert_eq!(refreshed.status, CanonicalStatus::Succeeded);
}

#[tokio::test]
async fn declined_card_surfaces_the_provider_message() {
    let fake = Arc::new(FakeProvider::default());
    let base_url = serve(
        Router::new()
            .route("/v1/payment_intents", post(stripe_create))
            .with_state(fake.clone()),
    )
    .await;
    let provider = StripeProvider::new(StripeConfig {
        secret_key: "sk_test_51Hx0000".to_string(),
        base_url,
        timeout_secs: 5,
        max_retries: 2,
        ..StripeConfig::default()
    })
    .unwrap();
    let orchestrator = orchestrator_for(Arc::new(provider));

    let request = PaymentRequest::new(Decimal::new(99, 2), "USD", PaymentMethod::Card);
    let err = orchestrator
        .create_charge(request, Some("order-card-2".to_string()))
        .await
        .expect_err("card is declined");
    match err {
        PaymentError::ProviderRejectedError {
            message,
            provider_code,
            ..
        } => {
            assert_eq!(message, "Your card was declined.");
            assert_eq!(provider_code.as_deref(), Some("402"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fake.seen().len(), 1);
}

// ---------------------------------------------------------------------------
// E-wallet
// ---------------------------------------------------------------------------

async fn xendit_create(
    State(state): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(&headers, "idempotency-key", body);
    if state.should_fail() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error_code": "SERVER_ERROR", "message": "try again"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "id": "ewc_5b2e",
            "status": "PENDING",
            "created": "2026-03-01T10:00:00.000Z",
            "actions": {
                "mobile_web_checkout_url": null,
                "desktop_web_checkout_url": "https://ewallet.xendit.co/desktop/ewc_5b2e"
            }
        })),
    )
}

async fn xendit_fetch(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"id": id, "status": "SUCCEEDED"}))
}

#[tokio::test]
async fn wallet_create_converts_and_resends_with_the_same_key() {
    let fake = Arc::new(FakeProvider::default());
    fake.fail_first_creates.store(1, Ordering::SeqCst);
    let base_url = serve(
        Router::new()
            .route("/ewallets/charges", post(xendit_create))
            .route("/ewallets/charges/{id}", get(xendit_fetch))
            .with_state(fake.clone()),
    )
    .await;
    let provider = XenditProvider::new(XenditConfig {
        secret_key: "xnd_development_key_123".to_string(),
        base_url,
        conversion_rate: Some(Decimal::new(5650, 2)),
        timeout_secs: 5,
        max_retries: 1,
        ..XenditConfig::default()
    })
    .unwrap();
    let orchestrator = orchestrator_for(Arc::new(provider));

    let request = PaymentRequest::new(Decimal::new(1000, 2), "USD", PaymentMethod::EWallet)
        .with_metadata("customer_phone", "+639171234567");
    let record = orchestrator
        .create_charge(request, Some("order-gcash-1".to_string()))
        .await
        .expect("second attempt succeeds");

    assert_eq!(record.charge_id, "ewc_5b2e");
    assert_eq!(record.provider_charge.provider, ProviderName::Xendit);
    assert_eq!(
        record.hosted_checkout_url.as_deref(),
        Some("https://ewallet.xendit.co/desktop/ewc_5b2e")
    );

    let seen = fake.seen();
    assert_eq!(seen.len(), 2, "one 503 and one success");
    for create in &seen {
        assert_eq!(create.idempotency_key.as_deref(), Some("order-gcash-1"));
        assert_eq!(
            create.authorization.as_deref(),
            Some("Basic eG5kX2RldmVsb3BtZW50X2tleV8xMjM6")
        );
        let body = &create.fields;
        assert_eq!(body["reference_id"], "order-gcash-1");
        assert_eq!(body["currency"], "PHP");
        assert_eq!(body["amount"].as_f64(), Some(565.0));
        assert_eq!(body["channel_code"], "PH_GCASH");
        assert_eq!(body["channel_properties"]["mobile_number"], "+639171234567");
        assert_eq!(body["metadata"]["original_currency"], "USD");
    }

    let refreshed = orchestrator.refresh_status("ewc_5b2e").await.unwrap();
    assert_eq!(refreshed.status, CanonicalStatus::Succeeded);
}

async fn paymongo_create(
    State(state): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record(&headers, "idempotency-key", body);
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "id": "src_Wq81",
                "type": "source",
                "attributes": {
                    "status": "pending",
                    "type": "gcash",
                    "created_at": 1772359200,
                    "redirect": {
                        "checkout_url": "https://test-sources.paymongo.com/sources?id=src_Wq81",
                        "success": "https://shop.example/paid",
                        "failed": "https://shop.example/failed"
                    }
                }
            }
        })),
    )
}

async fn paymongo_fetch(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"data": {"id": id, "attributes": {"status": "chargeable"}}}))
}

#[tokio::test]
async fn gcash_source_is_created_in_centavos_and_settled_by_webhook() {
    let fake = Arc::new(FakeProvider::default());
    let base_url = serve(
        Router::new()
            .route("/v1/sources", post(paymongo_create))
            .route("/v1/sources/{id}", get(paymongo_fetch))
            .with_state(fake.clone()),
    )
    .await;
    let provider: Arc<dyn omarapay_backend::payments::provider::PaymentProvider> = Arc::new(
        PayMongoProvider::new(PayMongoConfig {
            secret_key: "sk_test_pm_123".to_string(),
            webhook_secret: Some("whsk_pm_test".to_string()),
            base_url,
            conversion_rate: Some(Decimal::new(5650, 2)),
            success_redirect_url: "https://shop.example/paid".to_string(),
            failure_redirect_url: "https://shop.example/failed".to_string(),
            timeout_secs: 5,
            max_retries: 2,
            ..PayMongoConfig::default()
        })
        .unwrap(),
    );
    let registry = Arc::new(ChargeRegistry::new());
    let orchestrator = PaymentOrchestrator::new(
        ProviderSet::new().with_provider(provider.clone()),
        registry.clone(),
        OrchestratorConfig::default(),
    );

    let request = PaymentRequest::new(Decimal::new(1000, 2), "USD", PaymentMethod::EWallet);
    let record = orchestrator
        .create_charge(request, Some("order-pm-1".to_string()))
        .await
        .expect("fake paymongo accepts the source");

    assert_eq!(record.charge_id, "src_Wq81");
    assert_eq!(record.provider_charge.provider, ProviderName::PayMongo);
    assert_eq!(record.status, CanonicalStatus::Created);
    assert_eq!(
        record.hosted_checkout_url.as_deref(),
        Some("https://test-sources.paymongo.com/sources?id=src_Wq81")
    );

    let seen = fake.seen();
    assert_eq!(seen.len(), 1);
    let create = &seen[0];
    assert_eq!(
        create.authorization.as_deref(),
        Some("Basic c2tfdGVzdF9wbV8xMjM6")
    );
    assert_eq!(create.idempotency_key, None);
    let attributes = &create.fields["data"]["attributes"];
    assert_eq!(attributes["amount"], 56500);
    assert_eq!(attributes["currency"], "PHP");
    assert_eq!(attributes["type"], "gcash");
    assert_eq!(attributes["redirect"]["success"], "https://shop.example/paid");
    assert_eq!(attributes["redirect"]["failed"], "https://shop.example/failed");
    assert_eq!(attributes["metadata"]["idempotency_key"], "order-pm-1");
    assert_eq!(attributes["metadata"]["original_currency"], "USD");

    // Authorized but not yet captured.
    let refreshed = orchestrator.refresh_status("src_Wq81").await.unwrap();
    assert_eq!(refreshed.status, CanonicalStatus::Pending);
    assert_eq!(refreshed.native_status, "chargeable");

    let body = serde_json::to_vec(&json!({
        "data": {
            "id": "evt_pm_paid",
            "attributes": {
                "type": "payment.paid",
                "livemode": false,
                "data": {
                    "id": "pay_5kA",
                    "attributes": {
                        "status": "paid",
                        "source": {"id": "src_Wq81", "type": "gcash"}
                    }
                }
            }
        }
    }))
    .unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(&body);
    let signature = sign_hmac_sha256_hex(&signed, "whsk_pm_test").unwrap();
    let header = format!("t={},te={},li=", timestamp, signature);

    let processor = WebhookProcessor::new(
        ProviderSet::new().with_provider(provider),
        registry.clone(),
        true,
    );
    let outcome = processor
        .process_webhook("paymongo", Some(&header), &body)
        .await
        .expect("signed payment event applies");
    assert!(matches!(
        outcome,
        WebhookOutcome::Applied {
            status: CanonicalStatus::Succeeded,
            changed: true,
            verified: true,
            ..
        }
    ));
    let settled = registry.get("src_Wq81").await.unwrap();
    assert_eq!(settled.status, CanonicalStatus::Succeeded);
    assert_eq!(settled.last_update_source, UpdateSource::WebhookVerified);
}
