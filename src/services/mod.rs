//! Services module for charge bookkeeping and orchestration

pub mod onchain;
pub mod payment_orchestrator;
pub mod reconciliation;
pub mod registry;
pub mod webhook_processor;

pub use onchain::{OnchainConfig, OnchainStatus, OnchainVerifier};
pub use payment_orchestrator::{
    ChargeVerification, OnchainVerification, OrchestratorConfig, PaymentOrchestrator,
};
pub use registry::{ChargeRecord, ChargeRegistry, StatusUpdate, UpdateSource, Upserted};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};
