//! HTTP surface: charge endpoints, provider webhooks and the health check.

pub mod charges;
pub mod webhooks;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::webhook_queue::WebhookQueue;

use charges::ChargesState;
use webhooks::WebhookState;

/// Everything the routes need.
#[derive(Clone)]
pub struct ApiServices {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhook_processor: Arc<WebhookProcessor>,
    pub webhook_queue: WebhookQueue,
}

pub fn router(services: ApiServices) -> Router {
    let health_checker = HealthChecker::new(services.orchestrator.clone());

    Router::new()
        .route("/health", get(health))
        .with_state(health_checker)
        .merge(charges::routes(ChargesState {
            orchestrator: services.orchestrator,
        }))
        .merge(webhooks::routes(WebhookState {
            processor: services.webhook_processor,
            queue: services.webhook_queue,
        }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// GET /health
async fn health(State(checker): State<HealthChecker>) -> (StatusCode, Json<HealthStatus>) {
    let status = checker.check_health().await;
    if status.status == HealthState::Unhealthy {
        error!("Health check failed - no payment method available");
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    } else {
        (StatusCode::OK, Json(status))
    }
}
