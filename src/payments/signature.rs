//! Webhook signature schemes used by the supported providers.

use crate::payments::utils::secure_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Stripe rejects signatures older than five minutes by default.
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Hex HMAC-SHA256 over the raw body (Coinbase Commerce).
    HmacSha256Hex,
    /// `t=<unix>,v1=<hex>` where the MAC covers `"<t>.<raw body>"` (Stripe).
    TimestampedHmacSha256 { tolerance: Duration },
    /// `t=<unix>,te=<hex>,li=<hex>` with the same MAC input as above; `te`
    /// carries test-mode signatures and `li` live ones (PayMongo).
    TestOrLiveHmacSha256 { tolerance: Duration },
    /// Header must equal the shared token (Xendit callback token).
    StaticToken,
}

impl SignatureScheme {
    pub fn verify(&self, payload: &[u8], signature_header: &str, secret: &str) -> bool {
        self.verify_at(
            payload,
            signature_header,
            secret,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Same as [`verify`](Self::verify) with an explicit clock.
    pub fn verify_at(&self, payload: &[u8], signature_header: &str, secret: &str, now: i64) -> bool {
        if secret.is_empty() {
            return false;
        }
        match self {
            SignatureScheme::HmacSha256Hex => verify_hmac_sha256_hex(payload, secret, signature_header),
            SignatureScheme::TimestampedHmacSha256 { tolerance } => verify_timestamped_signature(
                payload,
                signature_header,
                secret,
                now,
                *tolerance,
                &["v1"],
            ),
            SignatureScheme::TestOrLiveHmacSha256 { tolerance } => verify_timestamped_signature(
                payload,
                signature_header,
                secret,
                now,
                *tolerance,
                &["te", "li"],
            ),
            SignatureScheme::StaticToken => {
                secure_eq(signature_header.trim().as_bytes(), secret.as_bytes())
            }
        }
    }
}

pub fn sign_hmac_sha256_hex(payload: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match sign_hmac_sha256_hex(payload, secret) {
        Some(computed) => secure_eq(
            computed.as_bytes(),
            signature.trim().to_ascii_lowercase().as_bytes(),
        ),
        None => false,
    }
}

/// Builds a `t=..,v1=..` header the way Stripe signs its deliveries.
pub fn sign_timestamped(payload: &[u8], secret: &str, timestamp: i64) -> Option<String> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    let signature = sign_hmac_sha256_hex(&signed, secret)?;
    Some(format!("t={},v1={}", timestamp, signature))
}

fn verify_timestamped_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance: Duration,
    signature_labels: &[&str],
) -> bool {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some((label, value)) if signature_labels.contains(&label) && !value.is_empty() => {
                candidates.push(value)
            }
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if candidates.is_empty() {
        return false;
    }
    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return false;
    }

    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    candidates
        .iter()
        .any(|candidate| verify_hmac_sha256_hex(&signed, secret, candidate))
}
