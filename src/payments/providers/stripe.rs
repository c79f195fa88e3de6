use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::{SignatureScheme, DEFAULT_TIMESTAMP_TOLERANCE};
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, ProviderCharge, ProviderName, WebhookEvent,
};
use crate::payments::utils::{to_minor_units, HttpAuth, PaymentHttpClient, Replay, RequestBody};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub webhook_tolerance_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            webhook_tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE.as_secs(),
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ConfigurationError {
                provider: "stripe".to_string(),
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("STRIPE_BASE_URL").unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            webhook_tolerance_secs: std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.webhook_tolerance_secs),
            secret_key,
        })
    }
}

/// Card payments through Stripe PaymentIntents.
pub struct StripeProvider {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::Stripe,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        info!(
            secret_key = %mask_secret(&config.secret_key),
            webhook_secret_configured = config.webhook_secret.is_some(),
            base_url = %config.base_url,
            "stripe adapter initialized"
        );
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn observed(intent: PaymentIntent) -> ObservedStatus {
        ObservedStatus::new(intent.status)
            .with_failure_reason(intent.last_payment_error.and_then(|e| e.message))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn supports_idempotency_keys(&self) -> bool {
        true
    }

    async fn create_charge(
        &self,
        request: &PaymentRequest,
        idempotency_key: &str,
    ) -> PaymentResult<ProviderCharge> {
        request.validate()?;
        let amount = to_minor_units(request.amount)?;

        let mut form = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("payment_method_types[]".to_string(), "card".to_string()),
        ];
        if let Some(description) = request.description() {
            form.push(("description".to_string(), description.to_string()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let intent: PaymentIntent = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                HttpAuth::Bearer(&self.config.secret_key),
                RequestBody::Form(&form),
                &[("Idempotency-Key", idempotency_key)],
                Replay::Safe,
            )
            .await?;
        info!(intent_id = %intent.id, status = %intent.status, amount_minor = amount, "stripe payment intent created");

        Ok(ProviderCharge {
            provider: ProviderName::Stripe,
            created_at: intent.created_at(),
            hosted_checkout_url: None,
            client_secret: intent.client_secret.clone(),
            native_status: intent.status.clone(),
            charge_id: intent.id,
        })
    }

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let intent: PaymentIntent = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", charge_id)),
                HttpAuth::Bearer(&self.config.secret_key),
                RequestBody::Empty,
                &[],
                Replay::Safe,
            )
            .await?;
        Ok(Self::observed(intent))
    }

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let intent: PaymentIntent = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{}/cancel", charge_id)),
                HttpAuth::Bearer(&self.config.secret_key),
                RequestBody::Form(&[]),
                &[],
                Replay::Safe,
            )
            .await?;
        info!(intent_id = %charge_id, status = %intent.status, "stripe payment intent cancelled");
        Ok(Self::observed(intent))
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status.trim().to_lowercase().as_str() {
            "succeeded" => CanonicalStatus::Succeeded,
            "processing" | "requires_capture" | "requires_confirmation" => {
                CanonicalStatus::Pending
            }
            "requires_action" | "requires_payment_method" => CanonicalStatus::RequiresAction,
            "canceled" => CanonicalStatus::Canceled,
            other => {
                warn!(provider = "stripe", native_status = %other, "unknown native status, treating as pending");
                CanonicalStatus::Pending
            }
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        "stripe-signature"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::TimestampedHmacSha256 {
            tolerance: Duration::from_secs(self.config.webhook_tolerance_secs),
        }
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        let event: StripeEvent =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid stripe webhook payload: {}", e),
                field: Some("body".to_string()),
            })?;

        if !event.event_type.starts_with("payment_intent.") {
            return Ok(None);
        }
        let intent: PaymentIntent =
            serde_json::from_value(event.data.object).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid payment intent in stripe webhook: {}", e),
                field: Some("data.object".to_string()),
            })?;

        Ok(Some(WebhookEvent {
            provider: ProviderName::Stripe,
            event_id: event.id,
            event_type: event.event_type,
            charge_id: intent.id.clone(),
            observed: Self::observed(intent),
            received_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    last_payment_error: Option<StripeErrorDetail>,
}

impl PaymentIntent {
    fn created_at(&self) -> DateTime<Utc> {
        self.created
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}
