use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Crypto,
    #[serde(rename = "ewallet")]
    EWallet,
    #[serde(rename = "googlewallet")]
    GoogleWallet,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Card,
        PaymentMethod::Crypto,
        PaymentMethod::EWallet,
        PaymentMethod::GoogleWallet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::EWallet => "ewallet",
            PaymentMethod::GoogleWallet => "googlewallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "crypto" => Ok(PaymentMethod::Crypto),
            "ewallet" | "e-wallet" | "wallet" | "gcash" => Ok(PaymentMethod::EWallet),
            "googlewallet" | "google_wallet" | "google-wallet" | "gpay" => {
                Ok(PaymentMethod::GoogleWallet)
            }
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment method: {}", value),
                field: Some("method".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Stripe,
    Coinbase,
    Xendit,
    #[serde(rename = "paymongo")]
    PayMongo,
    Mock,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Stripe => "stripe",
            ProviderName::Coinbase => "coinbase",
            ProviderName::Xendit => "xendit",
            ProviderName::PayMongo => "paymongo",
            ProviderName::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(ProviderName::Stripe),
            "coinbase" | "coinbase_commerce" | "coinbase-commerce" => Ok(ProviderName::Coinbase),
            "xendit" => Ok(ProviderName::Xendit),
            "paymongo" | "pay_mongo" => Ok(ProviderName::PayMongo),
            "mock" => Ok(ProviderName::Mock),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// One checkout attempt as submitted by the caller. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequest {
    pub fn new(amount: Decimal, currency: impl Into<String>, method: PaymentMethod) -> Self {
        Self {
            amount,
            currency: currency.into().trim().to_uppercase(),
            method,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError {
                message: format!("invalid currency code: {}", self.currency),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").map(String::as_str)
    }

    pub fn customer_phone(&self) -> Option<&str> {
        self.metadata
            .get("customer_phone")
            .or_else(|| self.metadata.get("phone"))
            .map(String::as_str)
    }
}

/// The resource an adapter created at its provider, before canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCharge {
    pub provider: ProviderName,
    pub charge_id: String,
    pub created_at: DateTime<Utc>,
    pub hosted_checkout_url: Option<String>,
    pub client_secret: Option<String>,
    pub native_status: String,
}

/// A provider's current view of a charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedStatus {
    pub native_status: String,
    pub failure_reason: Option<String>,
    pub hosted_checkout_url: Option<String>,
}

impl ObservedStatus {
    pub fn new(native_status: impl Into<String>) -> Self {
        Self {
            native_status: native_status.into(),
            failure_reason: None,
            hosted_checkout_url: None,
        }
    }

    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = reason;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    /// No shared secret configured, so nothing was checked.
    pub skipped: bool,
    pub reason: Option<String>,
}

impl WebhookVerificationResult {
    pub fn verified() -> Self {
        Self {
            valid: true,
            skipped: false,
            reason: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            valid: false,
            skipped: true,
            reason: Some("no webhook secret configured".to_string()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            skipped: false,
            reason: Some(reason.into()),
        }
    }
}

/// Charge status carried by a provider push notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderName,
    pub event_id: Option<String>,
    pub event_type: String,
    pub charge_id: String,
    pub observed: ObservedStatus,
    pub received_at: DateTime<Utc>,
}

/// One settlement the provider recorded against a charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementPayment {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Result of asking a provider whether a charge was actually paid.
///
/// `observed` already reflects the verdict: a verified charge reports the
/// provider's success status even when its timeline has not caught up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentVerification {
    pub observed: ObservedStatus,
    pub verified: bool,
    pub payments: Vec<SettlementPayment>,
}
