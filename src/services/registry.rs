//! In-memory charge registry.
//!
//! Records are created once by `register` and afterwards change only through
//! `upsert`. Each record sits behind its own mutex so that a webhook and a
//! poller racing on the same charge are serialized, and the terminal check
//! happens under the same lock as the write.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::status::CanonicalStatus;
use crate::payments::types::{PaymentRequest, ProviderCharge};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    Created,
    Poll,
    Refresh,
    WebhookVerified,
    WebhookUnverified,
    Operator,
    /// Settlement check against the provider's payment records.
    Verification,
    /// Transaction receipt read from the chain.
    Onchain,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Created => "created",
            UpdateSource::Poll => "poll",
            UpdateSource::Refresh => "refresh",
            UpdateSource::WebhookVerified => "webhook_verified",
            UpdateSource::WebhookUnverified => "webhook_unverified",
            UpdateSource::Operator => "operator",
            UpdateSource::Verification => "verification",
            UpdateSource::Onchain => "onchain",
        }
    }
}

impl std::fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: CanonicalStatus,
    pub native_status: String,
    pub failure_reason: Option<String>,
    pub hosted_checkout_url: Option<String>,
    pub source: UpdateSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRecord {
    pub charge_id: String,
    pub idempotency_key: String,
    pub request: PaymentRequest,
    pub provider_charge: ProviderCharge,
    pub status: CanonicalStatus,
    pub native_status: String,
    pub failure_reason: Option<String>,
    pub hosted_checkout_url: Option<String>,
    pub poll_attempts: u32,
    pub last_update_source: UpdateSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChargeRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Result of an `upsert`: the record as stored, and whether the status moved.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: ChargeRecord,
    pub changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub total: usize,
    pub in_progress: usize,
    pub terminal: usize,
    pub by_status: HashMap<CanonicalStatus, usize>,
}

#[derive(Default)]
pub struct ChargeRegistry {
    charges: RwLock<HashMap<String, Arc<Mutex<ChargeRecord>>>>,
    by_idempotency_key: RwLock<HashMap<String, String>>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChargeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a freshly created charge with status `Created`.
    /// Registering an id that already exists returns the stored record.
    pub async fn register(
        &self,
        request: PaymentRequest,
        idempotency_key: &str,
        provider_charge: ProviderCharge,
    ) -> ChargeRecord {
        let charge_id = provider_charge.charge_id.clone();
        let mut charges = self.charges.write().await;
        if let Some(existing) = charges.get(&charge_id) {
            let existing = existing.clone();
            drop(charges);
            debug!(charge_id = %charge_id, "charge already registered");
            return existing.lock().await.clone();
        }

        let now = Utc::now();
        let record = ChargeRecord {
            charge_id: charge_id.clone(),
            idempotency_key: idempotency_key.to_string(),
            request,
            native_status: provider_charge.native_status.clone(),
            hosted_checkout_url: provider_charge.hosted_checkout_url.clone(),
            provider_charge,
            status: CanonicalStatus::Created,
            failure_reason: None,
            poll_attempts: 0,
            last_update_source: UpdateSource::Created,
            created_at: now,
            updated_at: now,
        };
        charges.insert(charge_id.clone(), Arc::new(Mutex::new(record.clone())));
        drop(charges);

        self.by_idempotency_key
            .write()
            .await
            .insert(idempotency_key.to_string(), charge_id.clone());
        info!(
            charge_id = %charge_id,
            provider = %record.provider_charge.provider,
            method = %record.request.method,
            "charge registered"
        );
        record
    }

    async fn entry(&self, charge_id: &str) -> PaymentResult<Arc<Mutex<ChargeRecord>>> {
        self.charges
            .read()
            .await
            .get(charge_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFoundError {
                charge_id: charge_id.to_string(),
            })
    }

    pub async fn get(&self, charge_id: &str) -> PaymentResult<ChargeRecord> {
        let entry = self.entry(charge_id).await?;
        let record = entry.lock().await.clone();
        Ok(record)
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<ChargeRecord> {
        let charge_id = self.by_idempotency_key.read().await.get(key).cloned()?;
        self.get(&charge_id).await.ok()
    }

    /// Serializes creates that share an idempotency key. Hold the guard across
    /// the lookup, the provider call and `register`.
    pub async fn lock_idempotency_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// The only mutation path. Terminal records come back unchanged.
    pub async fn upsert(&self, charge_id: &str, update: StatusUpdate) -> PaymentResult<Upserted> {
        let entry = self.entry(charge_id).await?;
        let mut record = entry.lock().await;

        if record.is_terminal() {
            debug!(
                charge_id = %charge_id,
                status = %record.status,
                incoming = %update.status,
                source = %update.source,
                "charge already terminal, update ignored"
            );
            return Ok(Upserted {
                record: record.clone(),
                changed: false,
            });
        }

        if update.source == UpdateSource::Poll {
            record.poll_attempts = record.poll_attempts.saturating_add(1);
        }

        record.native_status = update.native_status;
        if update.failure_reason.is_some() {
            record.failure_reason = update.failure_reason;
        }
        if record.hosted_checkout_url.is_none() {
            record.hosted_checkout_url = update.hosted_checkout_url;
        }

        let changed = record.status != update.status;
        if changed {
            record.status = update.status;
            record.last_update_source = update.source;
            record.updated_at = Utc::now();
        }

        Ok(Upserted {
            record: record.clone(),
            changed,
        })
    }

    pub async fn stats(&self) -> RegistryStats {
        let entries: Vec<_> = self.charges.read().await.values().cloned().collect();
        let mut stats = RegistryStats::default();
        for entry in entries {
            let status = entry.lock().await.status;
            stats.total += 1;
            if status.is_terminal() {
                stats.terminal += 1;
            } else {
                stats.in_progress += 1;
            }
            *stats.by_status.entry(status).or_insert(0) += 1;
        }
        stats
    }
}
