use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};

/// A provider callback exactly as it arrived over HTTP.
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub provider: String,
    pub signature: Option<String>,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundWebhook {
    pub fn new(provider: impl Into<String>, signature: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            provider: provider.into(),
            signature,
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("webhook queue is closed")]
pub struct QueueClosed;

/// Producer side held by the HTTP handlers.
#[derive(Clone)]
pub struct WebhookQueue {
    tx: mpsc::Sender<InboundWebhook>,
}

impl WebhookQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InboundWebhook>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Waits for room when the queue is full.
    pub async fn enqueue(&self, webhook: InboundWebhook) -> Result<(), QueueClosed> {
        self.tx.send(webhook).await.map_err(|_| QueueClosed)
    }
}

pub struct WebhookWorker {
    processor: Arc<WebhookProcessor>,
    rx: mpsc::Receiver<InboundWebhook>,
}

impl WebhookWorker {
    pub fn new(processor: Arc<WebhookProcessor>, rx: mpsc::Receiver<InboundWebhook>) -> Self {
        Self { processor, rx }
    }

    /// Runs one task per event until shutdown or until every producer is
    /// gone. On shutdown the queue is closed to new events; everything
    /// already queued is still processed and every task is awaited, since
    /// each of those events was acknowledged to its provider.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Webhook worker started");
        let mut in_flight = JoinSet::new();

        if !*shutdown_rx.borrow_and_update() {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Webhook worker received shutdown signal");
                            break;
                        }
                    }
                    next = self.rx.recv() => {
                        match next {
                            Some(webhook) => {
                                in_flight.spawn(handle(self.processor.clone(), webhook));
                            }
                            None => {
                                info!("Webhook queue closed");
                                break;
                            }
                        }
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_join(joined);
                    }
                }
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(webhook) = self.rx.recv().await {
            in_flight.spawn(handle(self.processor.clone(), webhook));
            drained += 1;
        }
        if drained > 0 || !in_flight.is_empty() {
            info!(queued = drained, in_flight = in_flight.len(), "Draining acknowledged webhooks");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        info!("Webhook worker stopped");
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "webhook task panicked");
    }
}

async fn handle(processor: Arc<WebhookProcessor>, webhook: InboundWebhook) {
    let lag_ms = (Utc::now() - webhook.received_at).num_milliseconds();
    match processor
        .process_webhook(
            &webhook.provider,
            webhook.signature.as_deref(),
            &webhook.payload,
        )
        .await
    {
        Ok(WebhookOutcome::Applied {
            charge_id,
            status,
            changed,
            ..
        }) => {
            debug!(provider = %webhook.provider, charge_id = %charge_id, status = %status, changed, lag_ms, "webhook applied");
        }
        Ok(WebhookOutcome::Ignored { reason }) => {
            debug!(provider = %webhook.provider, reason = %reason, "webhook ignored");
        }
        Err(e @ WebhookProcessorError::InvalidSignature(_))
        | Err(e @ WebhookProcessorError::UnsignedEventRejected(_)) => {
            warn!(provider = %webhook.provider, error = %e, "webhook discarded");
        }
        Err(e) => {
            error!(provider = %webhook.provider, error = %e, lag_ms, "webhook processing failed");
        }
    }
}
