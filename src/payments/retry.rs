use crate::config::ConfigError;
use crate::payments::error::PaymentError;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_TRANSIENT_SIGNATURES: [&str; 2] =
    ["Activity doesn't exist yet", "Activity does not exist"];

/// Exponential backoff for operations that fail while the provider
/// environment is still warming up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Total calls, including the first one
    pub max_attempts: u32,
    pub max_delay: Option<Duration>,
    /// Substrings (case-insensitive) of error messages worth retrying
    pub transient_signatures: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(350),
            multiplier: 2.0,
            max_attempts: 6,
            max_delay: None,
            transient_signatures: DEFAULT_TRANSIENT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut policy = Self::default();
        if let Ok(value) = std::env::var("RETRY_BASE_DELAY_MS") {
            policy.base_delay = Duration::from_millis(
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("RETRY_BASE_DELAY_MS".to_string()))?,
            );
        }
        if let Ok(value) = std::env::var("RETRY_MULTIPLIER") {
            policy.multiplier = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RETRY_MULTIPLIER".to_string()))?;
        }
        if let Ok(value) = std::env::var("RETRY_MAX_ATTEMPTS") {
            policy.max_attempts = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".to_string()))?;
        }
        if let Ok(value) = std::env::var("RETRY_MAX_DELAY_MS") {
            policy.max_delay = Some(Duration::from_millis(
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("RETRY_MAX_DELAY_MS".to_string()))?,
            ));
        }
        if let Ok(value) = std::env::var("RETRY_TRANSIENT_SIGNATURES") {
            policy.transient_signatures = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_MULTIPLIER must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause after failed attempt `attempt` (1-based): `base * multiplier^(attempt-1)`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::MAX
        };

        match self.max_delay {
            Some(cap) if delay > cap => cap,
            _ => delay,
        }
    }

    pub fn is_transient(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.transient_signatures
            .iter()
            .any(|signature| message.contains(&signature.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with a non-transient error. No retry was made.
    #[error("{0}")]
    Failed(E),
    /// Every attempt failed with a transient error.
    #[error("'{operation}' still failing after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Failed(e) => e,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl From<RetryError<PaymentError>> for PaymentError {
    fn from(err: RetryError<PaymentError>) -> Self {
        match err {
            RetryError::Failed(e) => e,
            RetryError::Exhausted {
                operation,
                attempts,
                last_error,
            } => PaymentError::RetriesExhaustedError {
                operation,
                attempts,
                message: last_error.to_string(),
            },
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` calls have been made.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(
            operation = %operation_name,
            attempt,
            max_attempts,
            "executing operation"
        );

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        let message = err.to_string();
        if !policy.is_transient(&message) {
            debug!(operation = %operation_name, attempt, error = %message, "non-transient failure, not retrying");
            return Err(RetryError::Failed(err));
        }

        if attempt >= max_attempts {
            warn!(
                operation = %operation_name,
                attempts = attempt,
                error = %message,
                "transient failure persisted, giving up"
            );
            return Err(RetryError::Exhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                last_error: err,
            });
        }

        let delay = policy.delay_after_attempt(attempt);
        warn!(
            operation = %operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "transient failure, retrying"
        );
        sleep(delay).await;
    }
}
