use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// Missing or unusable credentials. Fatal for the affected adapter only.
    #[error("Configuration error: provider={provider}, message={message}")]
    ConfigurationError { provider: String, message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// The provider understood the request and declined it.
    #[error("Provider rejected request: provider={provider}, message={message}")]
    ProviderRejectedError {
        provider: String,
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    /// A transient environment error kept recurring until the retry budget ran out.
    #[error("Retries exhausted: operation={operation}, attempts={attempts}, last error: {message}")]
    RetriesExhaustedError {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Webhook verification failed: provider={provider}, reason={message}")]
    VerificationFailedError { provider: String, message: String },

    #[error("Charge not found: {charge_id}")]
    NotFoundError { charge_id: String },

    /// Polling ran out of attempts. The outcome is unknown, not failed.
    #[error("Status polling timed out: charge_id={charge_id}, attempts={attempts}")]
    TimedOutError { charge_id: String, attempts: u32 },

    #[error("Status polling cancelled: charge_id={charge_id}")]
    CancelledError { charge_id: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::ValidationError { .. } => false,
            PaymentError::ProviderRejectedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::RetriesExhaustedError { .. } => true,
            PaymentError::VerificationFailedError { .. } => false,
            PaymentError::NotFoundError { .. } => false,
            PaymentError::TimedOutError { .. } => true,
            PaymentError::CancelledError { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 503,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ProviderRejectedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::RetriesExhaustedError { .. } => 503,
            PaymentError::VerificationFailedError { .. } => 401,
            PaymentError::NotFoundError { .. } => 404,
            PaymentError::TimedOutError { .. } => 504,
            PaymentError::CancelledError { .. } => 409,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ConfigurationError { .. } => {
                "This payment method is not available right now".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ProviderRejectedError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
            PaymentError::RetriesExhaustedError { .. } => {
                "Payment provider was not ready. Please try again".to_string()
            }
            PaymentError::VerificationFailedError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::NotFoundError { charge_id } => {
                format!("Charge {} was not found", charge_id)
            }
            PaymentError::TimedOutError { .. } => {
                "Payment status unknown, retry later".to_string()
            }
            PaymentError::CancelledError { .. } => "Status polling was cancelled".to_string(),
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            PaymentError::ConfigurationError { provider, .. }
            | PaymentError::ProviderRejectedError { provider, .. }
            | PaymentError::ProviderError { provider, .. }
            | PaymentError::VerificationFailedError { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
