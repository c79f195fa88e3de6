use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::SignatureScheme;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, ProviderCharge, ProviderName, WebhookEvent,
};
use crate::payments::utils::{
    conversion_rate_from_env, HttpAuth, PaymentHttpClient, Replay, RequestBody,
    SettlementConversion,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct XenditConfig {
    pub secret_key: String,
    pub callback_token: Option<String>,
    pub base_url: String,
    pub channel_code: String,
    pub settlement_currency: String,
    /// Currency the conversion rate is quoted from.
    pub source_currency: String,
    /// Units of settlement currency per unit of source currency.
    pub conversion_rate: Option<Decimal>,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for XenditConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            callback_token: None,
            base_url: "https://api.xendit.co".to_string(),
            channel_code: "PH_GCASH".to_string(),
            settlement_currency: "PHP".to_string(),
            source_currency: "USD".to_string(),
            conversion_rate: None,
            success_redirect_url: "https://example.com/success".to_string(),
            failure_redirect_url: "https://example.com/failure".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl XenditConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key = std::env::var("XENDIT_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::ConfigurationError {
                provider: "xendit".to_string(),
                message: "XENDIT_SECRET_KEY environment variable is required".to_string(),
            })?;
        let defaults = Self::default();

        let conversion_rate = conversion_rate_from_env("xendit")?;

        Ok(Self {
            callback_token: std::env::var("XENDIT_CALLBACK_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            base_url: std::env::var("XENDIT_BASE_URL").unwrap_or(defaults.base_url),
            channel_code: std::env::var("EWALLET_CHANNEL_CODE").unwrap_or(defaults.channel_code),
            settlement_currency: std::env::var("EWALLET_SETTLEMENT_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or(defaults.settlement_currency),
            source_currency: std::env::var("EWALLET_SOURCE_CURRENCY")
                .map(|v| v.to_uppercase())
                .unwrap_or(defaults.source_currency),
            conversion_rate,
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
            secret_key,
        })
    }

    /// Converts a request amount into the settlement currency, rounded to cents.
    pub fn convert_to_settlement(&self, amount: Decimal, currency: &str) -> PaymentResult<Decimal> {
        SettlementConversion {
            settlement_currency: &self.settlement_currency,
            source_currency: &self.source_currency,
            rate: self.conversion_rate,
        }
        .convert("xendit", amount, currency)
    }
}

/// E-wallet (GCash) payments through Xendit e-wallet charges.
pub struct XenditProvider {
    config: XenditConfig,
    http: PaymentHttpClient,
}

impl XenditProvider {
    pub fn new(config: XenditConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            ProviderName::Xendit,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        info!(
            secret_key = %mask_secret(&config.secret_key),
            channel_code = %config.channel_code,
            settlement_currency = %config.settlement_currency,
            callback_token_configured = config.callback_token.is_some(),
            "xendit e-wallet adapter initialized"
        );
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(XenditConfig::from_env()?)
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
impl PaymentProvider for XenditProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Xendit
    }

    fn method(&self) -> PaymentMethod {
        PaymentMethod::EWallet
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
        let settlement_amount = self
            .config
            .convert_to_settlement(request.amount, &request.currency)?;
        let amount = settlement_amount
            .to_f64()
            .ok_or(PaymentError::ValidationError {
                message: format!("amount {} is out of range", settlement_amount),
                field: Some("amount".to_string()),
            })?;

        let mut metadata = serde_json::Map::new();
        for (key, value) in &request.metadata {
            metadata.insert(key.clone(), JsonValue::String(value.clone()));
        }
        metadata.insert(
            "original_amount".to_string(),
            JsonValue::String(request.amount.to_string()),
        );
        metadata.insert(
            "original_currency".to_string(),
            JsonValue::String(request.currency.clone()),
        );

        let mut channel_properties = serde_json::json!({
            "success_redirect_url": self.config.success_redirect_url,
            "failure_redirect_url": self.config.failure_redirect_url,
        });
        if let Some(phone) = request.customer_phone() {
            channel_properties["mobile_number"] = JsonValue::String(phone.to_string());
        }

        let payload = serde_json::json!({
            "reference_id": idempotency_key,
            "currency": self.config.settlement_currency,
            "amount": amount,
            "checkout_method": "ONE_TIME_PAYMENT",
            "channel_code": self.config.channel_code,
            "channel_properties": channel_properties,
            "metadata": metadata,
        });

        let charge: XenditCharge = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/ewallets/charges"),
                self.auth(),
                RequestBody::Json(&payload),
                &[("Idempotency-key", idempotency_key)],
                Replay::Safe,
            )
            .await?;
        info!(
            charge_id = %charge.id,
            status = %charge.status,
            settlement_amount = %settlement_amount,
            settlement_currency = %self.config.settlement_currency,
            "xendit e-wallet charge created"
        );

        Ok(ProviderCharge {
            provider: ProviderName::Xendit,
            created_at: charge.created.unwrap_or_else(Utc::now),
            hosted_checkout_url: charge.hosted_url(),
            client_secret: None,
            native_status: charge.status.clone(),
            charge_id: charge.id,
        })
    }

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let charge: XenditCharge = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/ewallets/charges/{}", charge_id)),
                self.auth(),
                RequestBody::Empty,
                &[],
                Replay::Safe,
            )
            .await?;
        Ok(charge.observed())
    }

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let charge: XenditCharge = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/ewallets/charges/{}/void", charge_id)),
                self.auth(),
                RequestBody::Empty,
                &[],
                Replay::Safe,
            )
            .await?;
        info!(charge_id = %charge_id, status = %charge.status, "xendit e-wallet charge voided");
        Ok(charge.observed())
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status.trim().to_uppercase().as_str() {
            "SUCCEEDED" => CanonicalStatus::Succeeded,
            "PENDING" => CanonicalStatus::Pending,
            "FAILED" => CanonicalStatus::Failed,
            "VOIDED" | "REFUNDED" => CanonicalStatus::Canceled,
            other => {
                warn!(provider = "xendit", native_status = %other, "unknown native status, treating as pending");
                CanonicalStatus::Pending
            }
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        "x-callback-token"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::StaticToken
    }

    fn webhook_secret(&self) -> Option<&str> {
        self.config.callback_token.as_deref()
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        let callback: XenditCallback =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid xendit callback payload: {}", e),
                field: Some("body".to_string()),
            })?;
        if !callback.event.starts_with("ewallet.") {
            return Ok(None);
        }

        Ok(Some(WebhookEvent {
            provider: ProviderName::Xendit,
            event_id: callback.id,
            event_type: callback.event,
            observed: callback.data.observed(),
            charge_id: callback.data.id,
            received_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct XenditActions {
    #[serde(default)]
    mobile_web_checkout_url: Option<String>,
    #[serde(default)]
    desktop_web_checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XenditCharge {
    id: String,
    status: String,
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    actions: Option<XenditActions>,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    failure_code: Option<String>,
}

impl XenditCharge {
    fn hosted_url(&self) -> Option<String> {
        let actions = self.actions.as_ref();
        actions
            .and_then(|a| a.mobile_web_checkout_url.clone())
            .or_else(|| actions.and_then(|a| a.desktop_web_checkout_url.clone()))
            .or_else(|| self.checkout_url.clone())
    }

    fn observed(&self) -> ObservedStatus {
        ObservedStatus {
            native_status: self.status.clone(),
            failure_reason: self.failure_code.clone(),
            hosted_checkout_url: self.hosted_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct XenditCallback {
    #[serde(default)]
    id: Option<String>,
    event: String,
    data: XenditCharge,
}
