//! JSON rendering of [`AppError`] for every API route.

use crate::error::{AppError, AppErrorKind, ErrorCode, ExternalError};
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds a client should wait before asking again about a charge whose
/// polling ran out.
const STATUS_UNKNOWN_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: error
                .context
                .as_ref()
                .map(|context| serde_json::json!({ "context": context })),
            retryable: Some(error.is_retryable()),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "Something went wrong on our side. Please try again.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }
}

fn retry_after(error: &AppError) -> Option<u64> {
    match &error.kind {
        AppErrorKind::External(ExternalError::RateLimit { retry_after, .. }) => *retry_after,
        AppErrorKind::External(ExternalError::StatusUnknown { .. }) => {
            Some(STATUS_UNKNOWN_RETRY_AFTER_SECS)
        }
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from_app_error(&self);

        if status.is_server_error() {
            tracing::error!(
                code = ?body.error,
                error = ?self.kind,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request failed"
            );
        } else {
            tracing::warn!(
                code = ?body.error,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "request rejected"
            );
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after(&self) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
