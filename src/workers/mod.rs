//! Background tasks: per-charge status pollers and the inbound webhook worker.

pub mod charge_poller;
pub mod webhook_queue;

pub use charge_poller::{spawn_poller, ChargePoller, PollHandle, PollOutcome, PollState, PollerConfig};
pub use webhook_queue::{InboundWebhook, WebhookQueue, WebhookWorker};
