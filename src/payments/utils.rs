use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderName;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub enum HttpAuth<'a> {
    None,
    Bearer(&'a str),
    Basic { username: &'a str, password: &'a str },
}

pub enum RequestBody<'a> {
    Empty,
    Json(&'a JsonValue),
    Form(&'a [(String, String)]),
}

/// Whether a request may be sent again when its first attempt ended with an
/// unknown outcome (timeout, dropped connection, 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Reads, cancels, and creates the provider deduplicates by key.
    Safe,
    /// Creates the provider cannot deduplicate. Resent only on 429 or when
    /// the connection was never established.
    UnsentOnly,
}

#[derive(Clone)]
pub struct PaymentHttpClient {
    provider: ProviderName,
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: ProviderName, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            provider,
            client,
            timeout,
            max_retries,
        })
    }

    /// Sends a request with up to `max_retries` resends and `2^attempt` second
    /// pauses between them. What is resent depends on `replay`. Any 4xx other
    /// than 429 becomes `ProviderRejectedError`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: HttpAuth<'_>,
        body: RequestBody<'_>,
        additional_headers: &[(&str, &str)],
        replay: Replay,
    ) -> PaymentResult<T> {
        let provider = self.provider.as_str();
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            match &auth {
                HttpAuth::None => {}
                HttpAuth::Bearer(token) => request = request.bearer_auth(token),
                HttpAuth::Basic { username, password } => {
                    request = request.basic_auth(username, Some(password))
                }
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            match &body {
                RequestBody::Empty => {}
                RequestBody::Json(payload) => request = request.json(payload),
                RequestBody::Form(fields) => request = request.form(fields),
            }

            debug!(provider = %provider, method = %method, url = %url, attempt = attempt + 1, "provider request");
            let can_resend = attempt < self.max_retries;
            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let unsent = e.is_connect();
                    if can_resend && (replay == Replay::Safe || unsent) {
                        warn!(provider = %provider, error = %e, attempt = attempt + 1, "provider request failed, retrying");
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let message = if unsent || replay == Replay::Safe {
                        format!("{} request failed: {}", provider, e)
                    } else {
                        format!("{} request failed and may have been applied: {}", provider, e)
                    };
                    return Err(PaymentError::NetworkError { message });
                }
            };

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
                    provider: provider.to_string(),
                    message: format!("invalid provider JSON response: {}", e),
                    provider_code: None,
                    retryable: false,
                });
            }

            if status.as_u16() == 429 {
                if can_resend {
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(PaymentError::RateLimitError {
                    message: format!("{} rate limit exceeded", provider),
                    retry_after_seconds: None,
                });
            }

            if status.is_server_error() && can_resend && replay == Replay::Safe {
                warn!(
                    provider = %provider,
                    status = %status,
                    attempt = attempt + 1,
                    "provider server error, retrying"
                );
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                attempt += 1;
                continue;
            }

            let message = extract_error_message(&text)
                .unwrap_or_else(|| format!("HTTP {}: {}", status, truncate(&text, 200)));
            if status.is_client_error() {
                return Err(PaymentError::ProviderRejectedError {
                    provider: provider.to_string(),
                    message,
                    provider_code: Some(status.as_u16().to_string()),
                });
            }
            return Err(PaymentError::ProviderError {
                provider: provider.to_string(),
                message,
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }
    }
}

/// Pulls the human-readable message out of the error envelopes used by
/// Stripe (`error.message`), Coinbase (`error.message`) and Xendit (`message`).
pub fn extract_error_message(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|v| v.as_str())
        .or_else(|| parsed.get("message").and_then(|v| v.as_str()))
        .map(|v| v.to_string())
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// `round(amount * 100)` with half-away-from-zero rounding.
pub fn to_minor_units(amount: Decimal) -> PaymentResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(PaymentError::ValidationError {
            message: format!("amount {} is out of range", amount),
            field: Some("amount".to_string()),
        })
}

/// Two-decimal string form used by providers that take major units.
pub fn format_major_units(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Currency settings shared by the e-wallet adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConversion<'a> {
    pub settlement_currency: &'a str,
    /// Currency the rate is quoted from.
    pub source_currency: &'a str,
    /// Units of settlement currency per unit of source currency.
    pub rate: Option<Decimal>,
}

impl SettlementConversion<'_> {
    /// Converts a request amount into the settlement currency, rounded to cents.
    pub fn convert(&self, provider: &str, amount: Decimal, currency: &str) -> PaymentResult<Decimal> {
        let currency = currency.trim().to_uppercase();
        if currency == self.settlement_currency {
            return Ok(amount);
        }
        if currency != self.source_currency {
            return Err(PaymentError::ValidationError {
                message: format!(
                    "e-wallet payments accept {} or {}, got {}",
                    self.settlement_currency, self.source_currency, currency
                ),
                field: Some("currency".to_string()),
            });
        }
        let rate = self
            .rate
            .filter(|rate| *rate > Decimal::ZERO)
            .ok_or(PaymentError::ConfigurationError {
                provider: provider.to_string(),
                message: format!(
                    "EWALLET_CONVERSION_RATE must be a positive rate to convert {} to {}",
                    currency, self.settlement_currency
                ),
            })?;
        Ok((amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

/// `EWALLET_CONVERSION_RATE`, if set.
pub fn conversion_rate_from_env(provider: &str) -> PaymentResult<Option<Decimal>> {
    match std::env::var("EWALLET_CONVERSION_RATE") {
        Ok(raw) => Decimal::from_str(raw.trim()).map(Some).map_err(|_| {
            PaymentError::ConfigurationError {
                provider: provider.to_string(),
                message: format!("EWALLET_CONVERSION_RATE is not a decimal: {}", raw),
            }
        }),
        Err(_) => Ok(None),
    }
}
