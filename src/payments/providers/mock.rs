use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::signature::SignatureScheme;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, ProviderCharge, ProviderName, WebhookEvent,
};
use crate::payments::utils::format_major_units;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

pub const DEFAULT_HOSTED_URL_BASE: &str = "https://pay.gcash.com/app/pay";
pub const DEFAULT_GOOGLEWALLET_URL_BASE: &str = "https://pay.google.com/gp/p/ui/pay";

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub hosted_url_base: String,
    /// Checkout page for mock Google Wallet charges.
    pub googlewallet_url_base: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            hosted_url_base: DEFAULT_HOSTED_URL_BASE.to_string(),
            googlewallet_url_base: DEFAULT_GOOGLEWALLET_URL_BASE.to_string(),
        }
    }
}

impl MockConfig {
    pub fn from_env() -> Self {
        let non_blank = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            hosted_url_base: non_blank("MOCK_HOSTED_URL_BASE")
                .unwrap_or_else(|| DEFAULT_HOSTED_URL_BASE.to_string()),
            googlewallet_url_base: non_blank("MOCK_GOOGLEWALLET_URL_BASE")
                .unwrap_or_else(|| DEFAULT_GOOGLEWALLET_URL_BASE.to_string()),
        }
    }

    fn url_base_for(&self, method: PaymentMethod) -> &str {
        match method {
            PaymentMethod::GoogleWallet => &self.googlewallet_url_base,
            _ => &self.hosted_url_base,
        }
    }
}

/// In-memory provider for methods without live credentials.
///
/// Charge ids derive from the idempotency key, so creating twice with the
/// same key returns the same charge. Status only moves through
/// [`MockProvider::force_status`] or `cancel_charge`.
pub struct MockProvider {
    method: PaymentMethod,
    config: MockConfig,
    charges: Mutex<HashMap<String, ProviderCharge>>,
}

impl MockProvider {
    pub fn new(method: PaymentMethod, config: MockConfig) -> Self {
        info!(
            method = %method,
            hosted_url_base = %config.url_base_for(method),
            "mock payment adapter initialized"
        );
        Self {
            method,
            config,
            charges: Mutex::new(HashMap::new()),
        }
    }

    fn charges(&self) -> MutexGuard<'_, HashMap<String, ProviderCharge>> {
        self.charges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn charge_id_for(&self, idempotency_key: &str) -> String {
        let digest = hex::encode(Sha256::digest(idempotency_key.as_bytes()));
        let prefix = match self.method {
            PaymentMethod::GoogleWallet => "gw",
            _ => "gc",
        };
        format!("{}_{}", prefix, &digest[..16])
    }

    /// Moves a mock charge to an arbitrary native status.
    pub fn force_status(&self, charge_id: &str, native_status: &str) -> PaymentResult<()> {
        let mut charges = self.charges();
        let charge = charges
            .get_mut(charge_id)
            .ok_or_else(|| PaymentError::NotFoundError {
                charge_id: charge_id.to_string(),
            })?;
        info!(charge_id = %charge_id, from = %charge.native_status, to = %native_status, "mock charge status forced");
        charge.native_status = native_status.to_string();
        Ok(())
    }

    fn observed(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        let charges = self.charges();
        let charge = charges
            .get(charge_id)
            .ok_or_else(|| PaymentError::NotFoundError {
                charge_id: charge_id.to_string(),
            })?;
        Ok(ObservedStatus {
            native_status: charge.native_status.clone(),
            failure_reason: None,
            hosted_checkout_url: charge.hosted_checkout_url.clone(),
        })
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Mock
    }

    fn method(&self) -> PaymentMethod {
        self.method
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
        let charge_id = self.charge_id_for(idempotency_key);

        let mut charges = self.charges();
        if let Some(existing) = charges.get(&charge_id) {
            return Ok(existing.clone());
        }

        let hosted_checkout_url = format!(
            "{}?ref={}&amount={}&currency={}",
            self.config.url_base_for(self.method).trim_end_matches('/'),
            charge_id,
            format_major_units(request.amount),
            request.currency
        );
        let charge = ProviderCharge {
            provider: ProviderName::Mock,
            charge_id: charge_id.clone(),
            created_at: Utc::now(),
            hosted_checkout_url: Some(hosted_checkout_url),
            client_secret: None,
            native_status: "pending".to_string(),
        };
        charges.insert(charge_id.clone(), charge.clone());
        info!(charge_id = %charge_id, method = %self.method, "mock charge created");
        Ok(charge)
    }

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        self.observed(charge_id)
    }

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus> {
        self.force_status(charge_id, "canceled")?;
        self.observed(charge_id)
    }

    fn normalize_status(&self, native_status: &str) -> CanonicalStatus {
        match native_status.trim().to_lowercase().as_str() {
            "created" => CanonicalStatus::Created,
            "pending" => CanonicalStatus::Pending,
            "requires_action" => CanonicalStatus::RequiresAction,
            "succeeded" => CanonicalStatus::Succeeded,
            "failed" => CanonicalStatus::Failed,
            "expired" => CanonicalStatus::Expired,
            "canceled" | "cancelled" => CanonicalStatus::Canceled,
            other => {
                warn!(provider = "mock", native_status = %other, "unknown native status, treating as pending");
                CanonicalStatus::Pending
            }
        }
    }

    fn webhook_signature_header(&self) -> &'static str {
        "x-mock-signature"
    }

    fn signature_scheme(&self) -> SignatureScheme {
        SignatureScheme::HmacSha256Hex
    }

    fn webhook_secret(&self) -> Option<&str> {
        None
    }

    fn parse_webhook_event(&self, _payload: &[u8]) -> PaymentResult<Option<WebhookEvent>> {
        Err(PaymentError::ValidationError {
            message: "mock provider does not receive webhooks".to_string(),
            field: None,
        })
    }
}
