use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{PaymentMethod, PaymentRequest, ProviderName, SettlementPayment};
use crate::services::onchain::OnchainStatus;
use crate::services::payment_orchestrator::{
    ChargeVerification, OnchainVerification, PaymentOrchestrator,
};
use crate::services::registry::ChargeRecord;
use crate::workers::charge_poller::PollState;

#[derive(Clone)]
pub struct ChargesState {
    pub orchestrator: Arc<PaymentOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChargeBody {
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChargeResponse {
    pub charge_id: String,
    pub provider: ProviderName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub canonical_status: CanonicalStatus,
    pub idempotency_key: String,
}

impl From<ChargeRecord> for CreateChargeResponse {
    fn from(record: ChargeRecord) -> Self {
        Self {
            charge_id: record.charge_id,
            provider: record.provider_charge.provider,
            hosted_checkout_url: record.hosted_checkout_url,
            client_secret: record.provider_charge.client_secret,
            canonical_status: record.status,
            idempotency_key: record.idempotency_key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChargeStatusResponse {
    pub charge_id: String,
    pub canonical_status: CanonicalStatus,
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub poll_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<ChargeRecord> for ChargeStatusResponse {
    fn from(record: ChargeRecord) -> Self {
        Self {
            terminal: record.is_terminal(),
            charge_id: record.charge_id,
            canonical_status: record.status,
            hosted_checkout_url: record.hosted_checkout_url,
            failure_reason: record.failure_reason,
            poll_attempts: record.poll_attempts,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub charge_id: String,
    pub canonical_status: CanonicalStatus,
    pub terminal: bool,
    pub verified: bool,
    pub payments: Vec<SettlementPayment>,
}

impl From<ChargeVerification> for VerificationResponse {
    fn from(verification: ChargeVerification) -> Self {
        Self {
            terminal: verification.record.is_terminal(),
            charge_id: verification.record.charge_id,
            canonical_status: verification.record.status,
            verified: verification.verified,
            payments: verification.payments,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OnchainVerificationResponse {
    pub charge_id: String,
    pub canonical_status: CanonicalStatus,
    /// Whether a receipt was read from the chain.
    pub onchain: bool,
    pub transaction_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    pub result: OnchainStatus,
    pub payments: Vec<SettlementPayment>,
}

impl From<OnchainVerification> for OnchainVerificationResponse {
    fn from(verification: OnchainVerification) -> Self {
        Self {
            charge_id: verification.record.charge_id,
            canonical_status: verification.record.status,
            onchain: verification.status.is_onchain(),
            transaction_hash: verification.transaction_hash,
            network: verification.network,
            result: verification.status,
            payments: verification.payments,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollStartedResponse {
    pub charge_id: String,
    pub poller: PollState,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub refresh: bool,
}

pub fn routes(state: ChargesState) -> Router {
    Router::new()
        .route("/api/payments/{method}", post(create_charge))
        .route("/api/payments/charges/{id}", get(get_charge))
        .route("/api/payments/charges/{id}/poll", post(start_polling))
        .route("/api/payments/charges/{id}/cancel", post(cancel_charge))
        .route("/api/payments/charges/{id}/verify", get(verify_charge))
        .route("/api/payments/charges/{id}/verify/onchain", get(verify_onchain))
        .with_state(Arc::new(state))
}

fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}

/// POST /api/payments/{method}
pub async fn create_charge(
    State(state): State<Arc<ChargesState>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<CreateChargeBody>, JsonRejection>,
) -> Result<Json<CreateChargeResponse>, AppError> {
    let method = PaymentMethod::from_str(&method).map_err(|_| {
        with_request_id(
            AppError::new(AppErrorKind::Validation(ValidationError::UnknownRoute {
                resource: format!("payment method {}", method),
            })),
            &headers,
        )
    })?;
    let Json(body) = payload.map_err(|rejection| {
        with_request_id(
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidPayload {
                reason: rejection.body_text(),
            })),
            &headers,
        )
    })?;

    let idempotency_key = body.idempotency_key.clone().or_else(|| {
        headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    let mut request = PaymentRequest::new(body.amount, body.currency, method);
    request.metadata = body.metadata;

    let record = state
        .orchestrator
        .create_charge(request, idempotency_key)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    info!(charge_id = %record.charge_id, method = %method, "Charge created via API");
    Ok(Json(record.into()))
}

/// GET /api/payments/charges/{id}
pub async fn get_charge(
    State(state): State<Arc<ChargesState>>,
    Path(charge_id): Path<String>,
    Query(query): Query<StatusQuery>,
    headers: HeaderMap,
) -> Result<Json<ChargeStatusResponse>, AppError> {
    let record = if query.refresh {
        state.orchestrator.refresh_status(&charge_id).await
    } else {
        state.orchestrator.get_status(&charge_id).await
    }
    .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(record.into()))
}

/// POST /api/payments/charges/{id}/poll
pub async fn start_polling(
    State(state): State<Arc<ChargesState>>,
    Path(charge_id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PollStartedResponse>), AppError> {
    let poller = state
        .orchestrator
        .start_polling(&charge_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PollStartedResponse { charge_id, poller }),
    ))
}

/// POST /api/payments/charges/{id}/cancel
pub async fn cancel_charge(
    State(state): State<Arc<ChargesState>>,
    Path(charge_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ChargeStatusResponse>, AppError> {
    let record = state
        .orchestrator
        .cancel_charge(&charge_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    info!(charge_id = %charge_id, status = %record.status, "Charge cancelled via API");
    Ok(Json(record.into()))
}

/// GET /api/payments/charges/{id}/verify
pub async fn verify_charge(
    State(state): State<Arc<ChargesState>>,
    Path(charge_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<VerificationResponse>, AppError> {
    let verification = state
        .orchestrator
        .verify_charge(&charge_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    info!(charge_id = %charge_id, verified = verification.verified, "Charge verified via API");
    Ok(Json(verification.into()))
}

/// GET /api/payments/charges/{id}/verify/onchain
pub async fn verify_onchain(
    State(state): State<Arc<ChargesState>>,
    Path(charge_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<OnchainVerificationResponse>, AppError> {
    let verification = state
        .orchestrator
        .verify_onchain(&charge_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(verification.into()))
}
