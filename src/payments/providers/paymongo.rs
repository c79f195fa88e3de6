use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::{SignatureScheme, DEFAULT_TIMESTAMP_TOLERANCE};
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, ProviderCharge, ProviderName, WebhookEvent,
};
use crate::payments::utils::{
    conversion_rate_from_env, to_minor_units, HttpAuth, PaymentHttpClient, Replay, RequestBody,
    SettlementConversion,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PayMongoConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    /// Source type, `gcash` unless overridden.
    pub source_type: String,
    pub settlement_currency: String,
    pub source_currency: String,
    pub conversion_rate: Option<Decimal>,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub webhook_tolerance_secs: u64,
}

impl Default for PayMongoConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paymongo.com".to_string(),
            source_type: "gcash".to_string(),
            settlement_currency: "PHP".to_string(),
            source_currency: "USD".to_string(),
            conversion_rate: None,
            success_redirect_url: "https://example.com/success".to_string(),
            failure_redirect_url: "https://example.com/failure".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            webhook_tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE.as_secs(),
        }
    }
}

impl PayMongoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("PAYMONGO_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ConfigurationError {
                provider: "paymongo".to_string(),
                message: "PAYMONGO_SECRET_KEY environment variable is required".to_string(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            webhook_secret: std::env::var("PAYMONGO_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("PAYMONGO_BASE_URL").unwrap_or(defaults.base_url),
            source_type: std::env::var("PAYMONGO_SOURCE_TYPE")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.source_type),
            settlement_currency: std::env::var("EWALLET_SETTLEMENT_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or(defaults.settlement_currency),
            source_currency: std::env::var("EWALLET_SOURCE_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or(defaults.source_currency),
            conversion_rate: conversion_rate_from_env("paymongo")?,
            success_redirect_url: std::env::var("EWALLET_SUCCESS_URL")
                .unwrap_or(defaults.success_redirect_url),
            failure_redirect_url: std::env::var("EWALLET_FAILURE_URL")
                .unwrap_or(defaults.failure_redirect_url),
            timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            webhook_tolerance_secs: std::env::var("PAYMONGO_WEBHOOK_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.webhook_tolerance_secs),
            secret_key,
        })
    }

    pub fn convert_to_settlement(&self, amount: Decimal, currency: &str) -> PaymentResult<Decimal> {
        SettlementConversion {
            settlement_currency: &self.settlement_currency,
            source_currency: &self.source_currency,
            rate: self.conversion_rate,
        }
        .convert("paymongo", amount, currency)
    }
}

/// E-wallet (GCash) payments through PayMongo sources.
///
/// A source becomes `chargeable` once the customer authorizes it; turning it
/// into a payment is left to PayMongo's auto-capture, so `chargeable` stays
/// pending here until the `paid` status or a `payment.paid` event arrives.
pub struct PayMongoProvider {
    config: PayMongoConfig,
    http: PaymentHttpClient,
}

impl PayMongoProvider {
    pub fn new(config: PayMongoConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::PayMongo,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        info!(
            secret_key = %mask_secret(&config.secret_key),
            source_type = %config.source_type,
            settlement_currency = %config.settlement_currency,
            webhook_secret_configured = config.webhook_secret.is_some(),
            "paymongo e-wallet adapter initialized"
        );
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PayMongoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self) -> HttpAuth<'_> {
        HttpAuth::Basic {
            username: &self.config.secret_key,
            password: "",
        }
    }
}

#[async_trait]
impl PaymentProvider for PayMongoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::PayMongo
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::EWallet
    }

    async fn create_charge(
        &self,
        request: &PaymentRequest,
        idempotency_key: &str,
    ) -> PaymentResult<ProviderCharge> {
        request.validate()?;
        let settlement_amount = self
            .config
            .convert_to_settlement(request.amount, &request.currency)?;
        let amount = to_minor_units(settlement_amount)?;

        let mut metadata = serde_json::Map::new();
        for (key, value) in &request.metadata {
            metadata.insert(key.clone(), JsonValue::String(value.clone()));
        }
        metadata.insert(
            "idempotency_key".to_string(),
            JsonValue::String(idempotency_key.to_string()),
        );
        metadata.insert(
            "original_amount".to_string(),
            JsonValue::String(request.amount.to_string()),
        );
        metadata.insert(
            "original_currency".to_string(),
            JsonValue::String(request.currency.clone()),
        );

        let payload = serde_json::json!({
            "data": {
                "attributes": {
                    "amount": amount,
                    "currency": self.config.settlement_currency,
                    "type": self.config.source_type,
                    "redirect": {
                        "success": self.config.success_redirect_url,
                        "failed": self.config.failure_redirect_url,
                    },
                    "metadata": metadata,
                }
            }
        });

        let envelope: SourceEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/sources"),
                self.auth(),
                RequestBody::Json(&payload),
                &[],
                // Sources carry no idempotency key; a resent create is a second source.
                Replay::UnsentOnly,
            )
            .await?;
        let source = envelope.data;
        info!(
            source_id = %source.id,
            status = %source.attributes.status,
            amount_minor = amount,
            settlement_currency = %self.config.settlement_currency,
            "paymongo source created"
        );

        Ok(ProviderCharge {
            provider: ProviderName::PayMongo,
            created_at: source.created_at(),
            hosted_checkout_url: source.checkout_url(),
            client_secret: None,
            native_status: source.attributes.status.clone(),
            charge_id: source.id,
        })
    }

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let envelope: SourceEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/sources/{}", charge_id)),
                self.auth(),
                RequestBody::Empty,
                &[],
                Replay::Safe,
            )
            .await?;
        Ok(envelope.data.observed())
    }

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        warn!(source_id = %charge_id, "paymongo sources cannot be cancelled, they expire instead");
        Err(PaymentError::ProviderRejectedError {
            provider: "paymongo".to_string(),
            message: format!(
                "source {} cannot be cancelled; it expires if the customer does not authorize it",
                charge_id
            ),
            provider_code: None,
        })
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status.trim().to_lowercase().as_str() {
            "pending" | "chargeable" => CanonicalStatus::Pending,
            "paid" | "consumed" => CanonicalStatus::Succeeded,
            "cancelled" | "canceled" => CanonicalStatus::Canceled,
            "expired" => CanonicalStatus::Expired,
            "failed" => CanonicalStatus::Failed,
            other => {
                warn!(provider = "paymongo", native_status = %other, "unknown native status, treating as pending");
                CanonicalStatus::Pending
            }
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        "paymongo-signature"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::TestOrLiveHmacSha256 {
            tolerance: Duration::from_secs(self.config.webhook_tolerance_secs),
        }
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        let envelope: EventEnvelope =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid paymongo webhook payload: {}", e),
                field: Some("body".to_string()),
            })?;
        let event = envelope.data;
        let resource = event.attributes.data;

        let (charge_id, observed) = if event.attributes.event_type.starts_with("source.") {
            let source: Source =
                serde_json::from_value(resource).map_err(|e| PaymentError::ValidationError {
                    message: format!("invalid source in paymongo webhook: {}", e),
                    field: Some("data.attributes.data".to_string()),
                })?;
            (source.id.clone(), source.observed())
        } else if event.attributes.event_type.starts_with("payment.") {
            let payment: Payment =
                serde_json::from_value(resource).map_err(|e| PaymentError::ValidationError {
                    message: format!("invalid payment in paymongo webhook: {}", e),
                    field: Some("data.attributes.data".to_string()),
                })?;
            // Payments are keyed by the source the charge was created as.
            let Some(source) = payment.attributes.source else {
                return Ok(None);
            };
            let observed = ObservedStatus::new(payment.attributes.status)
                .with_failure_reason(payment.attributes.failed_message);
            (source.id, observed)
        } else {
            return Ok(None);
        };

        Ok(Some(WebhookEvent {
            provider: ProviderName::PayMongo,
            event_id: event.id,
            event_type: event.attributes.event_type,
            charge_id,
            observed,
            received_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct SourceEnvelope {
    data: Source,
}

#[derive(Debug, Deserialize)]
struct Source {
    id: String,
    attributes: SourceAttributes,
}

#[derive(Debug, Deserialize)]
struct SourceAttributes {
    status: String,
    #[serde(default)]
    redirect: Option<SourceRedirect>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SourceRedirect {
    #[serde(default)]
    checkout_url: Option<String>,
}

impl Source {
    fn checkout_url(&self) -> Option<String> {
        self.attributes
            .redirect
            .as_ref()
            .and_then(|redirect| redirect.checkout_url.clone())
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.attributes
            .created_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now)
    }

    fn observed(&self) -> ObservedStatus {
        ObservedStatus {
            native_status: self.attributes.status.clone(),
            failure_reason: None,
            hosted_checkout_url: self.checkout_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Payment {
    attributes: PaymentAttributes,
}

#[derive(Debug, Deserialize)]
struct PaymentAttributes {
    status: String,
    #[serde(default)]
    source: Option<PaymentSource>,
    #[serde(default)]
    failed_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentSource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    data: Event,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    id: Option<String>,
    attributes: EventAttributes,
}

#[derive(Debug, Deserialize)]
struct EventAttributes {
    #[serde(rename = "type")]
    event_type: String,
    data: JsonValue,
}
