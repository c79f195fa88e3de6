//! Health check module
//! Reports which adapter serves each payment method and how many charges are tracked

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::types::ProviderName;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::registry::RegistryStats;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charges: Option<RegistryStats>,
    pub active_pollers: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            charges: None,
            active_pollers: 0,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl HealthChecker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let providers = self.orchestrator.providers();
        let enabled = providers.enabled();
        let mut degraded = false;

        for (method, provider) in &enabled {
            let component = if *provider == ProviderName::Mock {
                degraded = true;
                ComponentHealth::warning(None, Some("mock provider, no live charges".to_string()))
            } else {
                ComponentHealth::up(None).with_details(provider.as_str())
            };
            health_status
                .checks
                .insert(format!("payments.{}", method), component);
        }
        for (method, reason) in providers.disabled() {
            degraded = true;
            warn!(method = %method, reason = %reason, "Payment method unavailable");
            health_status
                .checks
                .insert(format!("payments.{}", method), ComponentHealth::down(Some(reason)));
        }

        let started = Instant::now();
        let registry = self.orchestrator.registry();
        match timeout(Duration::from_secs(5), registry.stats()).await {
            Ok(stats) => {
                let elapsed = started.elapsed().as_millis();
                info!(total = stats.total, in_progress = stats.in_progress, "Charge registry health check: OK ({}ms)", elapsed);
                health_status
                    .checks
                    .insert("charge_registry".to_string(), ComponentHealth::up(Some(elapsed)));
                health_status.charges = Some(stats);
            }
            Err(_) => {
                degraded = true;
                error!("Charge registry health check timed out");
                health_status.checks.insert(
                    "charge_registry".to_string(),
                    ComponentHealth::down(Some("Timeout".to_string())),
                );
            }
        }
        health_status.active_pollers = self.orchestrator.active_pollers().await;

        health_status.status = if enabled.is_empty() {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        health_status
    }
}
