use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::payments::factory::ProviderSet;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::ProviderName;
use crate::services::reconciliation::reconcile;
use crate::services::registry::{ChargeRegistry, UpdateSource};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Unsigned webhook rejected for provider {0}")]
    UnsignedEventRejected(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Unknown charge: {0}")]
    UnknownCharge(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied {
        charge_id: String,
        status: CanonicalStatus,
        changed: bool,
        verified: bool,
    },
    /// Authentic but carries nothing to apply (e.g. an unrelated event type).
    Ignored { reason: String },
}

/// Authenticates provider callbacks and applies them through the same
/// reconcile path the poller uses.
pub struct WebhookProcessor {
    providers: ProviderSet,
    registry: Arc<ChargeRegistry>,
    require_signatures: bool,
}

impl WebhookProcessor {
    pub fn new(
        providers: ProviderSet,
        registry: Arc<ChargeRegistry>,
        require_signatures: bool,
    ) -> Self {
        Self {
            providers,
            registry,
            require_signatures,
        }
    }

    /// Whether `provider_name` names a live provider that accepts webhooks.
    pub fn accepts(&self, provider_name: &str) -> bool {
        self.parse_provider(provider_name).is_ok()
    }

    /// Header carrying the signature for a configured provider.
    pub fn signature_header(&self, provider_name: &str) -> Option<&'static str> {
        let name = self.parse_provider(provider_name).ok()?;
        self.providers
            .by_name(name)
            .map(|provider| provider.webhook_signature_header())
    }

    /// `payload` must be the exact bytes received; signatures cover them verbatim.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let provider_kind = self.parse_provider(provider_name)?;
        let provider = self
            .providers
            .by_name(provider_kind)
            .ok_or_else(|| WebhookProcessorError::UnknownProvider(provider_name.to_string()))?;

        let verification = provider.verify_webhook(payload, signature);
        let source = if verification.valid {
            UpdateSource::WebhookVerified
        } else if verification.skipped {
            if self.require_signatures {
                warn!(provider = %provider_kind, "no webhook secret configured, unsigned event rejected");
                return Err(WebhookProcessorError::UnsignedEventRejected(
                    provider_kind.to_string(),
                ));
            }
            warn!(
                provider = %provider_kind,
                verification = "skipped",
                "no webhook secret configured, applying unverified event"
            );
            UpdateSource::WebhookUnverified
        } else {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            error!(provider = %provider_kind, reason = %reason, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature(reason));
        };

        let event = match provider
            .parse_webhook_event(payload)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?
        {
            Some(event) => event,
            None => {
                info!(provider = %provider_kind, "webhook event carries no charge status, ignored");
                return Ok(WebhookOutcome::Ignored {
                    reason: "event type carries no charge status".to_string(),
                });
            }
        };

        let upserted = reconcile(
            &self.registry,
            provider.as_ref(),
            &event.charge_id,
            event.observed,
            source,
        )
        .await
        .map_err(|e| match e {
            crate::payments::error::PaymentError::NotFoundError { charge_id } => {
                WebhookProcessorError::UnknownCharge(charge_id)
            }
            other => WebhookProcessorError::ProcessingError(other.to_string()),
        })?;

        info!(
            provider = %provider_kind,
            event_id = event.event_id.as_deref().unwrap_or("-"),
            event_type = %event.event_type,
            charge_id = %event.charge_id,
            status = %upserted.record.status,
            changed = upserted.changed,
            verified = verification.valid,
            "Webhook processed successfully"
        );

        Ok(WebhookOutcome::Applied {
            charge_id: event.charge_id,
            status: upserted.record.status,
            changed: upserted.changed,
            verified: verification.valid,
        })
    }

    fn parse_provider(&self, provider: &str) -> Result<ProviderName, WebhookProcessorError> {
        match ProviderName::from_str(provider) {
            Ok(ProviderName::Mock) | Err(_) => {
                Err(WebhookProcessorError::UnknownProvider(provider.to_string()))
            }
            Ok(name) => Ok(name),
        }
    }
}
