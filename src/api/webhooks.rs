use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, InfrastructureError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::webhook_queue::{InboundWebhook, WebhookQueue};

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
    pub queue: WebhookQueue,
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/{provider}", post(handle_webhook))
        .with_state(Arc::new(state))
}

/// POST /webhooks/{provider}
///
/// Acknowledges as soon as the event is queued. Signature checks happen in
/// the worker, so a forged event still gets a 200 and is dropped there.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>), AppError> {
    let request_id = get_request_id_from_headers(&headers);
    let tag = |err: AppError| match &request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    };
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    if !state.processor.accepts(&provider) {
        warn!(provider = %provider, "Webhook for unknown provider");
        return Err(tag(AppError::new(AppErrorKind::Validation(
            ValidationError::UnknownRoute {
                resource: format!("webhook provider {}", provider),
            },
        ))));
    }

    if let Err(e) = serde_json::from_slice::<JsonValue>(&body) {
        error!(provider = %provider, error = %e, "Invalid JSON payload");
        return Err(tag(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidPayload {
                reason: e.to_string(),
            },
        ))));
    }

    let signature = state
        .processor
        .signature_header(&provider)
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    if signature.is_none() {
        warn!(provider = %provider, "Webhook arrived without a signature header");
    }

    state
        .queue
        .enqueue(InboundWebhook::new(provider.clone(), signature, body.to_vec()))
        .await
        .map_err(|_| {
            error!(provider = %provider, "Webhook queue closed");
            tag(AppError::new(AppErrorKind::Infrastructure(
                InfrastructureError::WebhookQueueClosed,
            )))
        })?;

    Ok((StatusCode::OK, Json(serde_json::json!({"status": "queued"}))))
}
