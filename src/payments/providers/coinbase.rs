use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::SignatureScheme;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, PaymentVerification, ProviderCharge,
    ProviderName, SettlementPayment, WebhookEvent,
};
use crate::payments::utils::{format_major_units, HttpAuth, PaymentHttpClient, Replay, RequestBody};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

pub const COINBASE_API_VERSION: &str = "2018-03-22";

/// Payment statuses that mean the money arrived, whatever the timeline says.
const SETTLED_PAYMENT_STATUSES: [&str; 5] = ["COMPLETED", "RESOLVED", "CONFIRMED", "SETTLED", "SUCCESS"];

#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.commerce.coinbase.com".to_string(),
            api_version: COINBASE_API_VERSION.to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl CoinbaseConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key = std::env::var("COINBASE_API_KEY")
            .or_else(|_| std::env::var("COINBASE_COMMERCE_API_KEY"))
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ConfigurationError {
                provider: "coinbase".to_string(),
                message: "COINBASE_API_KEY environment variable is required".to_string(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            webhook_secret: std::env::var("COINBASE_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("COINBASE_BASE_URL").unwrap_or(defaults.base_url),
            api_version: std::env::var("COINBASE_API_VERSION").unwrap_or(defaults.api_version),
            timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            api_key,
        })
    }
}

/// Crypto payments through Coinbase Commerce hosted charges.
pub struct CoinbaseProvider {
    config: CoinbaseConfig,
    http: PaymentHttpClient,
}

impl CoinbaseProvider {
    pub fn new(config: CoinbaseConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::Coinbase,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        info!(
            api_key = %mask_secret(&config.api_key),
            webhook_secret_configured = config.webhook_secret.is_some(),
            base_url = %config.base_url,
            "coinbase commerce adapter initialized"
        );
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CoinbaseConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> [(&str, &str); 2] {
        [
            ("X-CC-Api-Key", self.config.api_key.as_str()),
            ("X-CC-Version", self.config.api_version.as_str()),
        ]
    }

    async fn fetch_charge(&self, charge_id: &str) -> PaymentResult<CoinbaseCharge> {
        let envelope: CoinbaseEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/charges/{}", charge_id)),
                HttpAuth::None,
                RequestBody::Empty,
                &self.headers(),
                Replay::Safe,
            )
            .await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl PaymentProvider for CoinbaseProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Coinbase
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::Crypto
    }

    async fn create_charge(
        &self,
        request: &PaymentRequest,
        idempotency_key: &str,
    ) -> PaymentResult<ProviderCharge> {
        request.validate()?;
        let amount = format_major_units(request.amount);

        let mut metadata = serde_json::Map::new();
        for (key, value) in &request.metadata {
            metadata.insert(key.clone(), JsonValue::String(value.clone()));
        }
        metadata.insert(
            "idempotency_key".to_string(),
            JsonValue::String(idempotency_key.to_string()),
        );

        let payload = serde_json::json!({
            "name": request.metadata.get("name").map(String::as_str).unwrap_or("POS Payment"),
            "description": request
                .description()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Payment of {} {}", amount, request.currency)),
            "local_price": {
                "amount": amount,
                "currency": request.currency,
            },
            "pricing_type": "fixed_price",
            "metadata": metadata,
        });

        let envelope: CoinbaseEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/charges"),
                HttpAuth::None,
                RequestBody::Json(&payload),
                &self.headers(),
                // Commerce has no idempotency keys; a resent create is a second charge.
                Replay::UnsentOnly,
            )
            .await?;
        let charge = envelope.data;
        let native_status = charge.native_status();
        info!(charge_id = %charge.id, code = ?charge.code, status = %native_status, "coinbase charge created");

        Ok(ProviderCharge {
            provider: ProviderName::Coinbase,
            created_at: charge.created_at.unwrap_or_else(Utc::now),
            hosted_checkout_url: charge.hosted_url.clone(),
            client_secret: None,
            native_status,
            charge_id: charge.id,
        })
    }

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        Ok(self.fetch_charge(charge_id).await?.observed())
    }

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let envelope: CoinbaseEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/charges/{}/cancel", charge_id)),
                HttpAuth::None,
                RequestBody::Empty,
                &self.headers(),
                Replay::Safe,
            )
            .await?;
        info!(charge_id = %charge_id, "coinbase charge cancelled");
        Ok(envelope.data.observed())
    }

    async fn verify_payment(&self, charge_id: &str) -> PaymentResult<PaymentVerification> {
        let charge = self.fetch_charge(charge_id).await?;
        let payments: Vec<SettlementPayment> = charge
            .payments
            .iter()
            .flatten()
            .map(CoinbasePayment::settlement)
            .collect();
        let verified = payments
            .iter()
            .any(|payment| SETTLED_PAYMENT_STATUSES.contains(&payment.status.to_uppercase().as_str()));

        let mut observed = charge.observed();
        if verified && self.normalize_status(&observed.native_status) != CanonicalStatus::Succeeded {
            observed.native_status = "COMPLETED".to_string();
        }
        info!(
            charge_id = %charge_id,
            payments = payments.len(),
            verified,
            native_status = %observed.native_status,
            "coinbase charge payments checked"
        );

        Ok(PaymentVerification {
            observed,
            verified,
            payments,
        })
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status.trim().to_uppercase().as_str() {
            "NEW" => CanonicalStatus::Created,
            "SIGNED" | "PENDING" => CanonicalStatus::Pending,
            "COMPLETED" | "RESOLVED" | "CONFIRMED" => CanonicalStatus::Succeeded,
            "EXPIRED" => CanonicalStatus::Expired,
            "CANCELED" | "CANCELLED" => CanonicalStatus::Canceled,
            "UNRESOLVED" | "FAILED" => CanonicalStatus::Failed,
            other => {
                warn!(provider = "coinbase", native_status = %other, "unknown native status, treating as pending");
                CanonicalStatus::Pending
            }
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        "x-cc-webhook-signature"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::HmacSha256Hex
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.webhook_secret.as_deref()
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        let envelope: CoinbaseWebhook =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid coinbase webhook payload: {}", e),
                field: Some("body".to_string()),
            })?;
        let event = envelope.event;
        if !event.event_type.starts_with("charge:") {
            return Ok(None);
        }

        let mut charge: CoinbaseCharge =
            serde_json::from_value(event.data).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid charge in coinbase webhook: {}", e),
                field: Some("event.data".to_string()),
            })?;
        if charge.status.is_none() {
            charge.status = status_from_event_type(&event.event_type).map(str::to_string);
        }

        Ok(Some(WebhookEvent {
            provider: ProviderName::Coinbase,
            event_id: event.id.or_else(|| envelope.id.map(|id| match id {
                JsonValue::String(id) => id,
                other => other.to_string(),
            })),
            event_type: event.event_type,
            observed: charge.observed(),
            charge_id: charge.id,
            received_at: Utc::now(),
        }))
    }
}

/// Status implied by the event name when the charge body carries neither a
/// timeline nor a top-level status.
fn status_from_event_type(event_type: &str) -> Option<&'static str> {
    match event_type {
        "charge:created" => Some("NEW"),
        "charge:pending" => Some("PENDING"),
        "charge:confirmed" => Some("CONFIRMED"),
        "charge:resolved" => Some("RESOLVED"),
        "charge:failed" => Some("FAILED"),
        "charge:delayed" => Some("UNRESOLVED"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CoinbaseEnvelope {
    data: CoinbaseCharge,
}

#[derive(Debug, Deserialize)]
struct CoinbaseCharge {
    id: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    hosted_url: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timeline: Option<Vec<TimelineEntry>>,
    #[serde(default)]
    payments: Option<Vec<CoinbasePayment>>,
}

/// One on-chain payment against a charge. Commerce has named the network and
/// hash fields differently over time, so each spelling is accepted.
#[derive(Debug, Default, Deserialize)]
struct CoinbasePayment {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    blockchain: Option<String>,
    #[serde(default)]
    chain: Option<String>,
    #[serde(default)]
    network_name: Option<String>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    network_transaction_id: Option<String>,
    #[serde(default)]
    onchain_transaction_id: Option<String>,
    #[serde(default)]
    value: Option<PaymentValue>,
}

#[derive(Debug, Deserialize)]
struct PaymentValue {
    #[serde(default)]
    crypto: Option<Money>,
    #[serde(default)]
    local: Option<Money>,
}

#[derive(Debug, Clone, Deserialize)]
struct Money {
    amount: String,
    currency: String,
}

fn first_present(candidates: [&Option<String>; 4]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

impl CoinbasePayment {
    fn settlement(&self) -> SettlementPayment {
        let money = self
            .value
            .as_ref()
            .and_then(|value| value.crypto.clone().or_else(|| value.local.clone()));
        SettlementPayment {
            status: self.status.clone().unwrap_or_default(),
            network: first_present([&self.network, &self.blockchain, &self.chain, &self.network_name])
                .map(|network| network.to_lowercase()),
            transaction_hash: first_present([
                &self.transaction_id,
                &self.transaction_hash,
                &self.network_transaction_id,
                &self.onchain_transaction_id,
            ]),
            amount: money.as_ref().map(|m| m.amount.clone()),
            currency: money.map(|m| m.currency),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimelineEntry {
    status: String,
    #[serde(default)]
    context: Option<String>,
}

impl CoinbaseCharge {
    /// The timeline is append-only, so its last entry is the current state.
    /// Falls back to the top-level field, then to `PENDING`.
    fn native_status(&self) -> String {
        self.timeline
            .as_ref()
            .and_then(|timeline| timeline.last())
            .map(|entry| entry.status.clone())
            .or_else(|| self.status.clone())
            .unwrap_or_else(|| "PENDING".to_string())
    }

    fn observed(&self) -> ObservedStatus {
        let context = self
            .timeline
            .as_ref()
            .and_then(|timeline| timeline.last())
            .and_then(|entry| entry.context.clone());
        ObservedStatus {
            native_status: self.native_status(),
            failure_reason: context,
            hosted_checkout_url: self.hosted_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoinbaseWebhook {
    #[serde(default)]
    id: Option<JsonValue>,
    event: CoinbaseWebhookEvent,
}

#[derive(Debug, Deserialize)]
struct CoinbaseWebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: JsonValue,
}
