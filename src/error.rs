//! Application error handling
//!
//! Maps payment and charge failures onto HTTP status codes, user-facing
//! messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payments::error::PaymentError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "CHARGE_NOT_FOUND")]
    ChargeNotFound,
    #[serde(rename = "PAYMENT_REJECTED")]
    PaymentRejected,
    #[serde(rename = "POLLING_CANCELLED")]
    PollingCancelled,

    // Infrastructure errors (5xx)
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "WEBHOOK_QUEUE_UNAVAILABLE")]
    WebhookQueueUnavailable,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PAYMENT_PROVIDER_UNAVAILABLE")]
    PaymentProviderUnavailable,
    #[serde(rename = "PAYMENT_PROVIDER_NOT_READY")]
    PaymentProviderNotReady,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "PAYMENT_STATUS_UNKNOWN")]
    PaymentStatusUnknown,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
}

/// Charge lifecycle errors
#[derive(Debug, Clone)]
pub enum DomainError {
    ChargeNotFound { charge_id: String },
    /// The provider declined the charge or the operation
    PaymentRejected { provider: String, message: String },
    PollingCancelled { charge_id: String },
}

/// Service-side errors
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Missing credentials or an unusable setting
    Configuration { message: String },
    WebhookQueueClosed,
}

/// Payment provider errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Unavailable { service: String, message: String },
    /// Transient start-up errors outlasted the retry budget
    NotReady { operation: String, attempts: u32 },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// Polling ran out of attempts; the charge may still settle
    StatusUnknown { charge_id: String, attempts: u32 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    InvalidPayload { reason: String },
    InvalidSignature { provider: String, reason: String },
    UnknownRoute { resource: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ChargeNotFound { .. } => 404,
                DomainError::PaymentRejected { .. } => 402, // Payment Required
                DomainError::PollingCancelled { .. } => 409, // Conflict
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Configuration { .. } => 503,
                InfrastructureError::WebhookQueueClosed => 503,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502, // Bad Gateway
                ExternalError::Unavailable { .. } => 503,
                ExternalError::NotReady { .. } => 503,
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
                ExternalError::StatusUnknown { .. } => 504, // Gateway Timeout
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { .. } => 400,
                ValidationError::InvalidPayload { .. } => 400,
                ValidationError::InvalidSignature { .. } => 401,
                ValidationError::UnknownRoute { .. } => 404,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ChargeNotFound { .. } => ErrorCode::ChargeNotFound,
                DomainError::PaymentRejected { .. } => ErrorCode::PaymentRejected,
                DomainError::PollingCancelled { .. } => ErrorCode::PollingCancelled,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::WebhookQueueClosed => ErrorCode::WebhookQueueUnavailable,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Unavailable { .. } => ErrorCode::PaymentProviderUnavailable,
                ExternalError::NotReady { .. } => ErrorCode::PaymentProviderNotReady,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::StatusUnknown { .. } => ErrorCode::PaymentStatusUnknown,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
                ValidationError::UnknownRoute { .. } => ErrorCode::NotFound,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::ChargeNotFound { charge_id } => {
                    format!("Charge '{}' not found", charge_id)
                }
                DomainError::PaymentRejected { message, .. } => message.clone(),
                DomainError::PollingCancelled { charge_id } => {
                    format!("Status polling for charge '{}' was cancelled", charge_id)
                }
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Configuration { .. } => {
                    "This payment method is not available right now".to_string()
                }
                InfrastructureError::WebhookQueueClosed => {
                    "Service temporarily unavailable. Please try again later".to_string()
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Unavailable { service, .. } => {
                    format!("{} is temporarily unavailable. Please try again", service)
                }
                ExternalError::NotReady { .. } => {
                    "Payment provider was not ready. Please try again".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::StatusUnknown { .. } => {
                    "Payment status unknown, retry later".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidPayload { reason } => {
                    format!("Invalid request body: {}", reason)
                }
                ValidationError::InvalidSignature { .. } => "Invalid webhook signature".to_string(),
                ValidationError::UnknownRoute { resource } => {
                    format!("'{}' not found", resource)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::WebhookQueueClosed => true,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Unavailable { .. } => true,
                ExternalError::NotReady { .. } => true,
                ExternalError::RateLimit { .. } => true,
                ExternalError::StatusUnknown { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let kind = match err {
            PaymentError::ConfigurationError { provider, message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: format!("{}: {}", provider, message),
                })
            }
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::ProviderRejectedError {
                provider, message, ..
            } => AppErrorKind::Domain(DomainError::PaymentRejected { provider, message }),
            PaymentError::NetworkError { message } => {
                AppErrorKind::External(ExternalError::Unavailable {
                    service: "Payment provider".to_string(),
                    message,
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment provider".to_string(),
                retry_after: retry_after_seconds,
            }),
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message,
                is_retryable: retryable,
            }),
            PaymentError::RetriesExhaustedError {
                operation, attempts, ..
            } => AppErrorKind::External(ExternalError::NotReady {
                operation,
                attempts,
            }),
            PaymentError::VerificationFailedError { provider, message } => {
                AppErrorKind::Validation(ValidationError::InvalidSignature {
                    provider,
                    reason: message,
                })
            }
            PaymentError::NotFoundError { charge_id } => {
                AppErrorKind::Domain(DomainError::ChargeNotFound { charge_id })
            }
            PaymentError::TimedOutError {
                charge_id,
                attempts,
            } => AppErrorKind::External(ExternalError::StatusUnknown {
                charge_id,
                attempts,
            }),
            PaymentError::CancelledError { charge_id } => {
                AppErrorKind::Domain(DomainError::PollingCancelled { charge_id })
            }
        };

        AppError::new(kind)
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
