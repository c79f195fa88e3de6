#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use omarapay_backend::payments::error::{PaymentError, PaymentResult};
use omarapay_backend::payments::factory::ProviderSet;
use omarapay_backend::payments::provider::PaymentProvider;
use omarapay_backend::payments::signature::SignatureScheme;
use omarapay_backend::payments::status::CanonicalStatus;
use omarapay_backend::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, ProviderCharge, ProviderName, WebhookEvent,
};
use omarapay_backend::services::payment_orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use omarapay_backend::services::registry::ChargeRegistry;

pub const FAKE_SIGNATURE_HEADER: &str = "x-fake-signature";

/// Provider whose answers are queued up front. Once a script runs dry the
/// fallback answer is returned forever.
pub struct FakeProvider {
    name: ProviderName,
    method: PaymentMethod,
    secret: Option<String>,
    create_errors: Mutex<VecDeque<PaymentError>>,
    fetch_script: Mutex<VecDeque<PaymentResult<String>>>,
    fallback_status: String,
    pub create_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub cancel_calls: AtomicU32,
}

impl FakeProvider {
    pub fn card() -> Self {
        Self::new(ProviderName::Stripe, PaymentMethod::Card)
    }

    pub fn crypto() -> Self {
        Self::new(ProviderName::Coinbase, PaymentMethod::Crypto)
    }

    pub fn new(name: ProviderName, method: PaymentMethod) -> Self {
        Self {
            name,
            method,
            secret: None,
            create_errors: Mutex::new(VecDeque::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            fallback_status: "pending".to_string(),
            create_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            cancel_calls: AtomicU32::new(0),
        }
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    /// The next `times` creates fail with `message` before one succeeds.
    pub fn failing_creates(self, message: &str, times: usize) -> Self {
        {
            let mut errors = self.create_errors.lock().unwrap();
            for _ in 0..times {
                errors.push_back(PaymentError::ProviderError {
                    provider: self.name.to_string(),
                    message: message.to_string(),
                    provider_code: None,
                    retryable: false,
                });
            }
        }
        self
    }

    pub fn with_fetches<I>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = PaymentResult<String>>,
    {
        self.fetch_script.lock().unwrap().extend(statuses);
        self
    }

    pub fn creates(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct FakeEvent {
    charge_id: String,
    status: String,
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn create_charge(
        &self,
        _request: &PaymentRequest,
        idempotency_key: &str,
    ) -> PaymentResult<ProviderCharge> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ProviderCharge {
            provider: self.name,
            charge_id: format!("fake_{}", idempotency_key),
            created_at: Utc::now(),
            hosted_checkout_url: Some(format!("https://pay.example.test/{}", idempotency_key)),
            client_secret: None,
            native_status: "created".to_string(),
        })
    }

    async fn fetch_status(&self, _charge_id: &str) -> PaymentResult<ObservedStatus> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.fetch_script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => Ok(ObservedStatus::new(status)),
            Some(Err(e)) => Err(e),
            None => Ok(ObservedStatus::new(self.fallback_status.clone())),
        }
    }

    async fn cancel_charge(&self, _charge_id: &str) -> PaymentResult<ObservedStatus> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ObservedStatus::new("canceled"))
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status {
            "created" => CanonicalStatus::Created,
            "requires_action" => CanonicalStatus::RequiresAction,
            "succeeded" => CanonicalStatus::Succeeded,
            "failed" => CanonicalStatus::Failed,
            "expired" => CanonicalStatus::Expired,
            "canceled" => CanonicalStatus::Canceled,
            _ => CanonicalStatus::Pending,
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        FAKE_SIGNATURE_HEADER
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::HmacSha256Hex
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        let event: FakeEvent =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: None,
            })?;
        Ok(Some(WebhookEvent {
            provider: self.name,
            event_id: None,
            event_type: "charge.updated".to_string(),
            charge_id: event.charge_id,
            observed: ObservedStatus::new(event.status),
            received_at: Utc::now(),
        }))
    }
}

pub fn native(status: &str) -> PaymentResult<String> {
    Ok(status.to_string())
}

pub fn card_request() -> PaymentRequest {
    PaymentRequest::new(Decimal::new(1250, 2), "USD", PaymentMethod::Card)
}

pub fn crypto_request() -> PaymentRequest {
    PaymentRequest::new(Decimal::new(4000, 2), "USD", PaymentMethod::Crypto)
}

pub fn orchestrator_with(
    provider: Arc<dyn PaymentProvider>,
    config: OrchestratorConfig,
) -> (Arc<PaymentOrchestrator>, Arc<ChargeRegistry>) {
    let registry = Arc::new(ChargeRegistry::new());
    let providers = ProviderSet::new().with_provider(provider);
    let orchestrator = Arc::new(PaymentOrchestrator::new(providers, registry.clone(), config));
    (orchestrator, registry)
}
