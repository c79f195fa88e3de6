//! Payment Orchestrator Service
//!
//! Creates charges through the adapter for the requested method, keeps the
//! registry in step with the provider, and owns the background pollers.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConfigError;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::ProviderSet;
use crate::payments::provider::PaymentProvider;
use crate::payments::retry::{with_retry, RetryPolicy};
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{PaymentMethod, PaymentRequest, SettlementPayment};
use crate::services::onchain::{candidate_payment, OnchainStatus, OnchainVerifier};
use crate::services::reconciliation::reconcile;
use crate::services::registry::{ChargeRecord, ChargeRegistry, StatusUpdate, UpdateSource};
use crate::workers::charge_poller::{spawn_poller, ChargePoller, PollHandle, PollState, PollerConfig};

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Policy for creates that can hit transient provider start-up errors
    pub retry_policy: RetryPolicy,
    /// Methods whose creates go through the retry wrapper
    pub retry_methods: HashSet<PaymentMethod>,
    pub poller: PollerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            retry_methods: HashSet::from([PaymentMethod::Card]),
            poller: PollerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry_methods = match std::env::var("RETRY_METHODS") {
            Ok(raw) => {
                let mut methods = HashSet::new();
                for part in raw.split(',') {
                    let value = part.trim();
                    if value.is_empty() {
                        continue;
                    }
                    methods.insert(PaymentMethod::from_str(value).map_err(|_| {
                        ConfigError::InvalidValue(format!("RETRY_METHODS: {}", value))
                    })?);
                }
                methods
            }
            Err(_) => HashSet::from([PaymentMethod::Card]),
        };

        Ok(Self {
            retry_policy: RetryPolicy::from_env()?,
            retry_methods,
            poller: PollerConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy.validate()?;
        self.poller.validate()
    }
}

// ============================================================================
// Verification results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChargeVerification {
    pub record: ChargeRecord,
    pub verified: bool,
    pub payments: Vec<SettlementPayment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnchainVerification {
    pub record: ChargeRecord,
    pub transaction_hash: String,
    pub network: Option<String>,
    pub status: OnchainStatus,
    pub payments: Vec<SettlementPayment>,
}

// ============================================================================
// Main Payment Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    providers: ProviderSet,
    registry: Arc<ChargeRegistry>,
    config: OrchestratorConfig,
    pollers: Mutex<HashMap<String, PollHandle>>,
    shutdown_tx: watch::Sender<bool>,
    onchain: Option<Arc<OnchainVerifier>>,
}

impl PaymentOrchestrator {
    pub fn new(
        providers: ProviderSet,
        registry: Arc<ChargeRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            providers,
            registry,
            config,
            pollers: Mutex::new(HashMap::new()),
            shutdown_tx,
            onchain: None,
        }
    }

    pub fn with_onchain_verifier(mut self, verifier: Arc<OnchainVerifier>) -> Self {
        self.onchain = Some(verifier);
        self
    }

    pub fn registry(&self) -> Arc<ChargeRegistry> {
        self.registry.clone()
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    fn provider_for(&self, record: &ChargeRecord) -> PaymentResult<Arc<dyn PaymentProvider>> {
        let provider = self.providers.for_method(record.request.method)?;
        if provider.name() != record.provider_charge.provider {
            return Err(PaymentError::ConfigurationError {
                provider: record.provider_charge.provider.to_string(),
                message: format!(
                    "charge {} was created with {}, which no longer serves {} payments",
                    record.charge_id,
                    record.provider_charge.provider,
                    record.request.method
                ),
            });
        }
        Ok(provider)
    }

    // =========================================================================
    // Charge creation
    // =========================================================================

    /// Creates a charge, or returns the one already created under the same
    /// idempotency key. A key is generated when the caller supplies none.
    pub async fn create_charge(
        &self,
        request: PaymentRequest,
        idempotency_key: Option<String>,
    ) -> PaymentResult<ChargeRecord> {
        request.validate()?;
        let key = idempotency_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let _guard = self.registry.lock_idempotency_key(&key).await;
        if let Some(existing) = self.registry.find_by_idempotency_key(&key).await {
            if existing.request.method != request.method {
                return Err(PaymentError::ValidationError {
                    message: format!(
                        "idempotency key {} was already used for a {} payment",
                        key, existing.request.method
                    ),
                    field: Some("idempotency_key".to_string()),
                });
            }
            info!(
                charge_id = %existing.charge_id,
                idempotency_key = %key,
                "returning existing charge for idempotency key"
            );
            return Ok(existing);
        }

        let method = request.method;
        let provider = self.providers.for_method(method)?;
        let charge = if self.config.retry_methods.contains(&method) {
            with_retry("create_charge", &self.config.retry_policy, || {
                provider.create_charge(&request, &key)
            })
            .await?
        } else {
            provider.create_charge(&request, &key).await?
        };

        info!(
            charge_id = %charge.charge_id,
            provider = %charge.provider,
            method = %method,
            amount = %request.amount,
            currency = %request.currency,
            "charge created"
        );
        Ok(self.registry.register(request, &key, charge).await)
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn get_status(&self, charge_id: &str) -> PaymentResult<ChargeRecord> {
        self.registry.get(charge_id).await
    }

    /// One provider fetch applied to the registry.
    pub async fn refresh_status(&self, charge_id: &str) -> PaymentResult<ChargeRecord> {
        let record = self.registry.get(charge_id).await?;
        if record.is_terminal() {
            return Ok(record);
        }
        let provider = self.provider_for(&record)?;
        let observed = provider.fetch_status(charge_id).await?;
        let upserted = reconcile(
            &self.registry,
            provider.as_ref(),
            charge_id,
            observed,
            UpdateSource::Refresh,
        )
        .await?;
        Ok(upserted.record)
    }

    /// Polls in the caller's task. Ends early on orchestrator shutdown.
    pub async fn poll_until_terminal(&self, charge_id: &str) -> PaymentResult<ChargeRecord> {
        let record = self.registry.get(charge_id).await?;
        if record.is_terminal() {
            return Ok(record);
        }
        let provider = self.provider_for(&record)?;
        ChargePoller::new(
            self.registry.clone(),
            provider,
            charge_id,
            self.config.poller.clone(),
        )
        .run(self.shutdown_tx.subscribe())
        .await?
        .into_result()
    }

    /// Starts a poller the caller owns. It is not tracked by `stop_polling`.
    pub async fn spawn_poller(&self, charge_id: &str) -> PaymentResult<PollHandle> {
        let record = self.registry.get(charge_id).await?;
        let provider = self.provider_for(&record)?;
        Ok(spawn_poller(
            self.registry.clone(),
            provider,
            charge_id,
            self.config.poller.clone(),
        ))
    }

    // =========================================================================
    // Background polling
    // =========================================================================

    /// Starts a tracked background poller unless one is already running.
    pub async fn start_polling(&self, charge_id: &str) -> PaymentResult<PollState> {
        let record = self.registry.get(charge_id).await?;
        if record.is_terminal() {
            return Ok(PollState::Terminal(record.status));
        }

        let mut pollers = self.pollers.lock().await;
        pollers.retain(|_, handle| !handle.is_finished());
        if let Some(handle) = pollers.get(charge_id) {
            return Ok(handle.state());
        }

        let provider = self.provider_for(&record)?;
        let handle = spawn_poller(
            self.registry.clone(),
            provider,
            charge_id,
            self.config.poller.clone(),
        );
        let state = handle.state();
        pollers.insert(charge_id.to_string(), handle);
        info!(charge_id = %charge_id, "background polling started");
        Ok(state)
    }

    /// Returns whether a running poller was stopped.
    pub async fn stop_polling(&self, charge_id: &str) -> bool {
        let handle = self.pollers.lock().await.remove(charge_id);
        match handle {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.cancel();
                if running {
                    info!(charge_id = %charge_id, "background polling stopped");
                }
                running
            }
            None => false,
        }
    }

    pub async fn active_pollers(&self) -> usize {
        self.pollers
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Cancels every poller and waits for them to wind down.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<PollHandle> = self.pollers.lock().await.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return;
        }
        info!(pollers = handles.len(), "stopping background pollers");
        for handle in &handles {
            handle.cancel();
        }
        let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "poller ended with error during shutdown");
            }
        }
    }

    // =========================================================================
    // Settlement verification
    // =========================================================================

    /// Asks the provider whether the charge was paid and records its answer.
    pub async fn verify_charge(&self, charge_id: &str) -> PaymentResult<ChargeVerification> {
        let record = self.registry.get(charge_id).await?;
        let provider = self.provider_for(&record)?;
        let verification = provider.verify_payment(charge_id).await?;
        let upserted = reconcile(
            &self.registry,
            provider.as_ref(),
            charge_id,
            verification.observed,
            UpdateSource::Verification,
        )
        .await?;
        Ok(ChargeVerification {
            record: upserted.record,
            verified: verification.verified,
            payments: verification.payments,
        })
    }

    /// Reads the receipt of the charge's settlement transaction from the chain.
    /// A confirmed receipt settles the charge, a reverted one fails it.
    pub async fn verify_onchain(&self, charge_id: &str) -> PaymentResult<OnchainVerification> {
        let verifier = self.onchain.clone().ok_or(PaymentError::ConfigurationError {
            provider: "onchain".to_string(),
            message: "on-chain verification is not configured".to_string(),
        })?;
        let record = self.registry.get(charge_id).await?;
        if record.request.method != PaymentMethod::Crypto {
            return Err(PaymentError::ValidationError {
                message: format!(
                    "charge {} is a {} payment; only crypto charges settle on chain",
                    charge_id, record.request.method
                ),
                field: Some("charge_id".to_string()),
            });
        }

        let provider = self.provider_for(&record)?;
        let verification = provider.verify_payment(charge_id).await?;
        let payments = verification.payments;
        let candidate = candidate_payment(&payments).ok_or(PaymentError::ValidationError {
            message: format!("no payments found on charge {}", charge_id),
            field: Some("payments".to_string()),
        })?;
        let transaction_hash =
            candidate
                .transaction_hash
                .clone()
                .ok_or(PaymentError::ValidationError {
                    message: format!("no transaction hash found for charge {}", charge_id),
                    field: Some("transaction_hash".to_string()),
                })?;
        let network = candidate.network.clone();

        let status = verifier.check(network.as_deref(), &transaction_hash).await?;
        let settled = match &status {
            OnchainStatus::Confirmed { .. } => Some((CanonicalStatus::Succeeded, "onchain_confirmed", None)),
            OnchainStatus::Reverted { .. } => Some((
                CanonicalStatus::Failed,
                "onchain_reverted",
                Some("transaction reverted on chain".to_string()),
            )),
            OnchainStatus::NoRpcConfigured | OnchainStatus::NotMined { .. } => None,
        };
        let record = match settled {
            Some((status, native_status, failure_reason)) => {
                let upserted = self
                    .registry
                    .upsert(
                        charge_id,
                        StatusUpdate {
                            status,
                            native_status: native_status.to_string(),
                            failure_reason,
                            hosted_checkout_url: None,
                            source: UpdateSource::Onchain,
                        },
                    )
                    .await?;
                if upserted.changed {
                    self.stop_polling(charge_id).await;
                    info!(
                        charge_id = %charge_id,
                        tx_hash = %transaction_hash,
                        status = %upserted.record.status,
                        "charge settled from chain receipt"
                    );
                }
                upserted.record
            }
            None => record,
        };

        Ok(OnchainVerification {
            record,
            transaction_hash,
            network,
            status,
            payments,
        })
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels at the provider and records the result. Terminal charges are
    /// returned as they are.
    pub async fn cancel_charge(&self, charge_id: &str) -> PaymentResult<ChargeRecord> {
        let record = self.registry.get(charge_id).await?;
        if record.is_terminal() {
            info!(charge_id = %charge_id, status = %record.status, "charge already terminal, nothing to cancel");
            return Ok(record);
        }

        let provider = self.provider_for(&record)?;
        let observed = provider.cancel_charge(charge_id).await?;
        let upserted = reconcile(
            &self.registry,
            provider.as_ref(),
            charge_id,
            observed,
            UpdateSource::Operator,
        )
        .await?;
        self.stop_polling(charge_id).await;
        Ok(upserted.record)
    }
}

// ============================================================================
// Tests
// ============================================================================
