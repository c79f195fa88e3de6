use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::retry::RetryPolicy;
use crate::payments::status::CanonicalStatus;
use crate::services::reconciliation::reconcile;
use crate::services::registry::{ChargeRecord, ChargeRegistry, UpdateSource};

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Pause between fetches while the charge is still in progress
    pub interval: Duration,
    /// Fetches allowed before giving up, errors included
    pub max_attempts: u32,
    /// Backoff applied to consecutive retryable fetch errors
    pub error_backoff: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            error_backoff: RetryPolicy {
                base_delay: Duration::from_millis(1000),
                multiplier: 2.0,
                max_attempts: u32::MAX,
                max_delay: Some(Duration::from_secs(60)),
                transient_signatures: Vec::new(),
            },
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("POLL_INTERVAL_SECS") {
            config.interval = Duration::from_secs(
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("POLL_INTERVAL_SECS".to_string()))?,
            );
        }
        if let Ok(value) = std::env::var("POLL_MAX_ATTEMPTS") {
            config.max_attempts = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("POLL_MAX_ATTEMPTS".to_string()))?;
        }
        if let Ok(value) = std::env::var("POLL_ERROR_BACKOFF_BASE_MS") {
            config.error_backoff.base_delay = Duration::from_millis(value.parse().map_err(|_| {
                ConfigError::InvalidValue("POLL_ERROR_BACKOFF_BASE_MS".to_string())
            })?);
        }
        if let Ok(value) = std::env::var("POLL_ERROR_BACKOFF_MULTIPLIER") {
            config.error_backoff.multiplier = value.parse().map_err(|_| {
                ConfigError::InvalidValue("POLL_ERROR_BACKOFF_MULTIPLIER".to_string())
            })?;
        }
        if let Ok(value) = std::env::var("POLL_ERROR_BACKOFF_MAX_SECS") {
            config.error_backoff.max_delay = Some(Duration::from_secs(value.parse().map_err(
                |_| ConfigError::InvalidValue("POLL_ERROR_BACKOFF_MAX_SECS".to_string()),
            )?));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        self.error_backoff.validate()
    }
}

/// Lifecycle of one poller, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Polling { attempts: u32 },
    Terminal(CanonicalStatus),
    TimedOut { attempts: u32 },
    Cancelled,
}

impl PollState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            PollState::Terminal(_) | PollState::TimedOut { .. } | PollState::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Terminal(ChargeRecord),
    /// The charge may still settle; its outcome is unknown.
    TimedOut { record: ChargeRecord, attempts: u32 },
    Cancelled { record: ChargeRecord },
}

impl PollOutcome {
    pub fn record(&self) -> &ChargeRecord {
        match self {
            PollOutcome::Terminal(record)
            | PollOutcome::TimedOut { record, .. }
            | PollOutcome::Cancelled { record } => record,
        }
    }

    /// Terminal records as `Ok`; the other outcomes as their error.
    pub fn into_result(self) -> PaymentResult<ChargeRecord> {
        match self {
            PollOutcome::Terminal(record) => Ok(record),
            PollOutcome::TimedOut { record, attempts } => Err(PaymentError::TimedOutError {
                charge_id: record.charge_id,
                attempts,
            }),
            PollOutcome::Cancelled { record } => Err(PaymentError::CancelledError {
                charge_id: record.charge_id,
            }),
        }
    }
}

pub struct ChargePoller {
    registry: Arc<ChargeRegistry>,
    provider: Arc<dyn PaymentProvider>,
    charge_id: String,
    config: PollerConfig,
    state_tx: watch::Sender<PollState>,
}

impl ChargePoller {
    pub fn new(
        registry: Arc<ChargeRegistry>,
        provider: Arc<dyn PaymentProvider>,
        charge_id: impl Into<String>,
        config: PollerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(PollState::Idle);
        Self {
            registry,
            provider,
            charge_id: charge_id.into(),
            config,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state_tx.subscribe()
    }

    fn publish(&self, state: PollState) {
        self.state_tx.send_replace(state);
    }

    /// Polls until the charge is terminal, the attempt bound is hit, or
    /// `cancel_rx` flips to `true`. A dropped cancel sender counts as a cancel.
    /// Cancellation is checked between attempts only; a fetch already in
    /// flight is completed and applied.
    pub async fn run(self, mut cancel_rx: watch::Receiver<bool>) -> PaymentResult<PollOutcome> {
        let charge_id = self.charge_id.clone();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts: u32 = 0;
        let mut consecutive_errors: u32 = 0;
        let mut cancel_requested = *cancel_rx.borrow();

        info!(
            charge_id = %charge_id,
            provider = %self.provider.name(),
            interval_secs = self.config.interval.as_secs(),
            max_attempts,
            "charge poller started"
        );
        self.publish(PollState::Polling { attempts });

        loop {
            let record = self.registry.get(&charge_id).await?;
            if record.is_terminal() {
                info!(charge_id = %charge_id, status = %record.status, attempts, "charge reached terminal status");
                self.publish(PollState::Terminal(record.status));
                return Ok(PollOutcome::Terminal(record));
            }

            if cancel_requested {
                info!(charge_id = %charge_id, attempts, "charge poller cancelled");
                self.publish(PollState::Cancelled);
                return Ok(PollOutcome::Cancelled { record });
            }

            if attempts >= max_attempts {
                warn!(charge_id = %charge_id, attempts, status = %record.status, "charge polling timed out");
                self.publish(PollState::TimedOut { attempts });
                return Ok(PollOutcome::TimedOut { record, attempts });
            }

            attempts += 1;
            let delay = match self.provider.fetch_status(&charge_id).await {
                Ok(observed) => {
                    consecutive_errors = 0;
                    let upserted = reconcile(
                        &self.registry,
                        self.provider.as_ref(),
                        &charge_id,
                        observed,
                        UpdateSource::Poll,
                    )
                    .await?;
                    if upserted.record.is_terminal() {
                        continue;
                    }
                    self.config.interval
                }
                Err(e) if e.is_retryable() => {
                    consecutive_errors += 1;
                    let delay = self.config.error_backoff.delay_after_attempt(consecutive_errors);
                    warn!(
                        charge_id = %charge_id,
                        attempt = attempts,
                        consecutive_errors,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "status fetch failed, backing off"
                    );
                    delay
                }
                Err(e) => {
                    warn!(charge_id = %charge_id, attempt = attempts, error = %e, "status fetch rejected");
                    self.config.interval
                }
            };
            self.publish(PollState::Polling { attempts });

            if attempts >= max_attempts {
                continue;
            }

            debug!(charge_id = %charge_id, attempt = attempts, delay_ms = delay.as_millis() as u64, "waiting before next status fetch");
            tokio::select! {
                _ = sleep(delay) => {}
                changed = cancel_rx.changed() => {
                    cancel_requested = changed.is_err() || *cancel_rx.borrow();
                }
            }
        }
    }
}

/// A poller running on its own task.
pub struct PollHandle {
    charge_id: String,
    cancel_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<PollState>,
    join: JoinHandle<PaymentResult<PollOutcome>>,
}

impl PollHandle {
    pub fn charge_id(&self) -> &str {
        &self.charge_id
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn state(&self) -> PollState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> PaymentResult<PollOutcome> {
        let charge_id = self.charge_id;
        // Keep the sender alive until the task ends so it is not read as a cancel.
        let _cancel_tx = self.cancel_tx;
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PaymentError::CancelledError { charge_id }),
            Err(e) => Err(PaymentError::ProviderError {
                provider: "poller".to_string(),
                message: format!("poller task for {} panicked: {}", charge_id, e),
                provider_code: None,
                retryable: false,
            }),
        }
    }
}

pub fn spawn_poller(
    registry: Arc<ChargeRegistry>,
    provider: Arc<dyn PaymentProvider>,
    charge_id: impl Into<String>,
    config: PollerConfig,
) -> PollHandle {
    let charge_id = charge_id.into();
    let poller = ChargePoller::new(registry, provider, charge_id.clone(), config);
    let state_rx = poller.subscribe();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let join = tokio::spawn(poller.run(cancel_rx));
    PollHandle {
        charge_id,
        cancel_tx,
        state_rx,
        join,
    }
}
