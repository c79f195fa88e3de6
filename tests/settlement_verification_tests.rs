use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use omarapay_backend::payments::factory::ProviderSet;
use omarapay_backend::payments::providers::{CoinbaseConfig, CoinbaseProvider};
use omarapay_backend::payments::status::CanonicalStatus;
use omarapay_backend::payments::types::{
    PaymentMethod, PaymentRequest, ProviderCharge, ProviderName,
};
use omarapay_backend::services::onchain::{OnchainConfig, OnchainStatus, OnchainVerifier};
use omarapay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use omarapay_backend::services::registry::{ChargeRegistry, UpdateSource};

const CHARGE_ID: &str = "cb-9d21";
const TX_HASH: &str = "0x9c1e5f0d7a";

/// A Commerce charge still pending in its timeline, with the given payments.
struct FakeCommerce {
    payments: Value,
}

async fn fetch_charge(
    State(state): State<Arc<FakeCommerce>>,
    Path(id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "data": {
            "id": id,
            "code": "7HF2KD",
            "hosted_url": "https://commerce.coinbase.com/pay/7HF2KD",
            "created_at": "2026-03-01T10:00:00Z",
            "timeline": [
                {"status": "NEW", "time": "2026-03-01T10:00:00Z"},
                {"status": "PENDING", "time": "2026-03-01T10:03:00Z"}
            ],
            "payments": state.payments
        }
    }))
}

/// Answers the three JSON-RPC calls a receipt check makes.
struct FakeNode {
    receipt: Value,
    calls: AtomicU32,
}

async fn rpc(State(state): State<Arc<FakeNode>>, Json(body): Json<Value>) -> Json<Value> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["jsonrpc"], "2.0");
    let result = match body["method"].as_str() {
        Some("eth_getTransactionReceipt") => {
            assert_eq!(body["params"][0], TX_HASH);
            state.receipt.clone()
        }
        Some("eth_getTransactionByHash") => json!({"hash": TX_HASH, "blockNumber": null}),
        Some("eth_blockNumber") => json!("0x6d"),
        other => panic!("unexpected RPC method {:?}", other),
    };
    Json(json!({"jsonrpc": "2.0", "id": body["id"], "result": result}))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn payment(status: &str) -> Value {
    json!({
        "status": status,
        "network": "Ethereum",
        "transaction_id": TX_HASH,
        "value": {
            "crypto": {"amount": "0.0081", "currency": "ETH"},
            "local": {"amount": "25.00", "currency": "USD"}
        }
    })
}

async fn orchestrator(payments: Value) -> (PaymentOrchestrator, Arc<ChargeRegistry>) {
    let base_url = serve(
        Router::new()
            .route("/charges/{id}", get(fetch_charge))
            .with_state(Arc::new(FakeCommerce { payments })),
    )
    .await;
    let provider = CoinbaseProvider::new(CoinbaseConfig {
        api_key: "cb_test_key_123456".to_string(),
        base_url,
        timeout_secs: 5,
        max_retries: 0,
        ..CoinbaseConfig::default()
    })
    .unwrap();

    let registry = Arc::new(ChargeRegistry::new());
    registry
        .register(
            PaymentRequest::new(Decimal::new(2500, 2), "USD", PaymentMethod::Crypto),
            "order-verify-1",
            ProviderCharge {
                provider: ProviderName::Coinbase,
                charge_id: CHARGE_ID.to_string(),
                created_at: Utc::now(),
                hosted_checkout_url: Some("https://commerce.coinbase.com/pay/7HF2KD".to_string()),
                client_secret: None,
                native_status: "NEW".to_string(),
            },
        )
        .await;
    let orchestrator = PaymentOrchestrator::new(
        ProviderSet::new().with_provider(Arc::new(provider)),
        registry.clone(),
        OrchestratorConfig::default(),
    );
    (orchestrator, registry)
}

async fn node(receipt: Value) -> (Arc<OnchainVerifier>, Arc<FakeNode>) {
    let state = Arc::new(FakeNode {
        receipt,
        calls: AtomicU32::new(0),
    });
    let url = serve(Router::new().route("/", post(rpc)).with_state(state.clone())).await;
    let config = OnchainConfig::from_vars(
        [("RPC_ETHEREUM".to_string(), format!("{}/", url))],
        Duration::from_secs(5),
    );
    (Arc::new(OnchainVerifier::new(config).unwrap()), state)
}

#[tokio::test]
async fn confirmed_payment_settles_a_charge_the_timeline_still_shows_pending() {
    let (orchestrator, registry) = orchestrator(json!([payment("CONFIRMED")])).await;

    let verification = orchestrator.verify_charge(CHARGE_ID).await.unwrap();

    assert!(verification.verified);
    assert_eq!(verification.record.status, CanonicalStatus::Succeeded);
    assert_eq!(verification.record.native_status, "COMPLETED");
    assert_eq!(verification.payments.len(), 1);
    let settlement = &verification.payments[0];
    assert_eq!(settlement.network.as_deref(), Some("ethereum"));
    assert_eq!(settlement.transaction_hash.as_deref(), Some(TX_HASH));
    assert_eq!(settlement.amount.as_deref(), Some("0.0081"));
    assert_eq!(settlement.currency.as_deref(), Some("ETH"));

    let stored = registry.get(CHARGE_ID).await.unwrap();
    assert_eq!(stored.status, CanonicalStatus::Succeeded);
    assert_eq!(stored.last_update_source, UpdateSource::Verification);
}

#[tokio::test]
async fn unsettled_payments_are_not_verified() {
    let (orchestrator, registry) = orchestrator(json!([payment("PENDING")])).await;

    let verification = orchestrator.verify_charge(CHARGE_ID).await.unwrap();

    assert!(!verification.verified);
    assert_eq!(verification.record.status, CanonicalStatus::Pending);
    assert_eq!(verification.record.native_status, "PENDING");
    assert_eq!(
        registry.get(CHARGE_ID).await.unwrap().status,
        CanonicalStatus::Pending
    );
}

#[tokio::test]
async fn mined_receipt_settles_the_charge() {
    let (orchestrator, registry) = orchestrator(json!([payment("PENDING")])).await;
    let (verifier, node) = node(json!({"blockNumber": "0x64", "status": "0x1"})).await;
    let orchestrator = orchestrator.with_onchain_verifier(verifier);

    let verification = orchestrator.verify_onchain(CHARGE_ID).await.unwrap();

    assert_eq!(
        verification.status,
        OnchainStatus::Confirmed {
            block_number: 100,
            confirmations: 10
        }
    );
    assert_eq!(verification.transaction_hash, TX_HASH);
    assert_eq!(verification.network.as_deref(), Some("ethereum"));
    assert_eq!(verification.record.status, CanonicalStatus::Succeeded);
    assert_eq!(node.calls.load(Ordering::SeqCst), 2);

    let stored = registry.get(CHARGE_ID).await.unwrap();
    assert_eq!(stored.native_status, "onchain_confirmed");
    assert_eq!(stored.last_update_source, UpdateSource::Onchain);
}

#[tokio::test]
async fn reverted_receipt_fails_the_charge() {
    let (orchestrator, registry) = orchestrator(json!([payment("PENDING")])).await;
    let (verifier, _) = node(json!({"blockNumber": "0x64", "status": "0x0"})).await;
    let orchestrator = orchestrator.with_onchain_verifier(verifier);

    let verification = orchestrator.verify_onchain(CHARGE_ID).await.unwrap();

    assert!(matches!(verification.status, OnchainStatus::Reverted { .. }));
    let stored = registry.get(CHARGE_ID).await.unwrap();
    assert_eq!(stored.status, CanonicalStatus::Failed);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("transaction reverted on chain")
    );
}

#[tokio::test]
async fn unmined_transaction_leaves_the_charge_alone() {
    let (orchestrator, registry) = orchestrator(json!([payment("PENDING")])).await;
    let (verifier, node) = node(Value::Null).await;
    let orchestrator = orchestrator.with_onchain_verifier(verifier);

    let verification = orchestrator.verify_onchain(CHARGE_ID).await.unwrap();

    assert_eq!(
        verification.status,
        OnchainStatus::NotMined {
            transaction_found: true
        }
    );
    assert_eq!(node.calls.load(Ordering::SeqCst), 2);
    let stored = registry.get(CHARGE_ID).await.unwrap();
    assert_eq!(stored.status, CanonicalStatus::Created);
    assert_eq!(stored.last_update_source, UpdateSource::Created);
}
