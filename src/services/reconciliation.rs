use crate::payments::error::PaymentResult;
use crate::payments::provider::PaymentProvider;
use crate::payments::types::ObservedStatus;
use crate::services::registry::{ChargeRegistry, StatusUpdate, UpdateSource, Upserted};
use tracing::{debug, info};

/// Normalizes what a provider reported and applies it to the registry.
/// Webhooks, polls, refreshes and operator cancels all land here.
pub async fn reconcile(
    registry: &ChargeRegistry,
    provider: &dyn PaymentProvider,
    charge_id: &str,
    observed: ObservedStatus,
    source: UpdateSource,
) -> PaymentResult<Upserted> {
    let status = provider.normalize_status(&observed.native_status);
    let native_status = observed.native_status.clone();
    let upserted = registry
        .upsert(
            charge_id,
            StatusUpdate {
                status,
                native_status: observed.native_status,
                failure_reason: observed.failure_reason,
                hosted_checkout_url: observed.hosted_checkout_url,
                source,
            },
        )
        .await?;

    if upserted.changed {
        info!(
            charge_id = %charge_id,
            provider = %provider.name(),
            native_status = %native_status,
            status = %upserted.record.status,
            terminal = upserted.record.is_terminal(),
            source = %source,
            "charge status changed"
        );
    } else {
        debug!(
            charge_id = %charge_id,
            native_status = %native_status,
            status = %upserted.record.status,
            source = %source,
            "charge status unchanged"
        );
    }

    Ok(upserted)
}
