use crate::payments::error::PaymentResult;
use crate::payments::signature::SignatureScheme;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{
    ObservedStatus, PaymentMethod, PaymentRequest, PaymentVerification, ProviderCharge,
    ProviderName, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;

/// One external processor behind one payment method.
///
/// Every comparison against the provider's native status vocabulary lives in
/// the implementation of `normalize_status`; nothing else in the crate looks
/// at native strings.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    fn method(&self) -> PaymentMethod;

    /// Whether the provider itself deduplicates creates by idempotency key.
    fn supports_idempotency_keys(&self) -> bool {
        false
    }

    async fn create_charge(
        &self,
        request: &PaymentRequest,
        idempotency_key: &str,
    ) -> PaymentResult<ProviderCharge>;

    async fn fetch_status(&self, charge_id: &str) -> PaymentResult<ObservedStatus>;

    async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ObservedStatus>;

    /// Whether the charge was actually paid. Providers that expose their
    /// settlements override this; the default trusts the charge status.
    async fn verify_payment(&self, charge_id: &str) -> PaymentResult<PaymentVerification> {
        let observed = self.fetch_status(charge_id).await?;
        let verified = self.normalize_status(&observed.native_status) == CanonicalStatus::Succeeded;
        Ok(PaymentVerification {
            observed,
            verified,
            payments: Vec::new(),
        })
    }

    /// Total: unknown values map to `Pending`.
    fn normalize_status(&self, native_status: &str) -> CanonicalStatus;

    fn webhook_signature_header(&self) -> &'static str;

    fn signature_scheme(&self) -> SignatureScheme;

    fn webhook_secret(&self) -> Option<&str>;

    fn verify_webhook(&self, payload: &[u8], signature: Option<&str>) -> WebhookVerificationResult {
        let Some(secret) = self.webhook_secret().filter(|s| !s.is_empty()) else {
            return WebhookVerificationResult::skipped();
        };
        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            return WebhookVerificationResult::rejected(format!(
                "missing {} header",
                self.webhook_signature_header()
            ));
        };
        if self.signature_scheme().verify(payload, signature, secret) {
            WebhookVerificationResult::verified()
        } else {
            WebhookVerificationResult::rejected(format!("invalid {} signature", self.name()))
        }
    }

    /// `Ok(None)` for well-formed events that carry no charge status.
    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<Option<WebhookEvent>>;
}
