//! On-chain confirmation of crypto settlements.
//!
//! The payment's network hint selects an EVM JSON-RPC endpoint from the
//! `RPC_*` environment; the transaction receipt then decides between
//! confirmed, reverted and not yet mined.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::SettlementPayment;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Network hints Commerce uses that name the same chain as an `RPC_*` key.
const NETWORK_ALIASES: [(&str, &str); 4] = [
    ("eth", "ethereum"),
    ("matic", "polygon"),
    ("binance", "bsc"),
    ("bnb", "bsc"),
];

#[derive(Debug, Clone)]
pub struct OnchainConfig {
    /// Lowercase network name to RPC URL, from `RPC_<NETWORK>`.
    pub rpc_urls: HashMap<String, String>,
    /// `RPC_DEFAULT`, used when the network has no endpoint of its own.
    pub default_rpc: Option<String>,
    pub request_timeout: Duration,
}

impl Default for OnchainConfig {
    fn default() -> Self {
        Self {
            rpc_urls: HashMap::new(),
            default_rpc: None,
            request_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

impl OnchainConfig {
    pub fn from_env() -> Self {
        let request_timeout = std::env::var("ONCHAIN_RPC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RPC_TIMEOUT);
        Self::from_vars(std::env::vars(), request_timeout)
    }

    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
        request_timeout: Duration,
    ) -> Self {
        let mut config = Self {
            request_timeout,
            ..Self::default()
        };
        for (key, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            let Some(network) = key.strip_prefix("RPC_") else {
                continue;
            };
            if network == "DEFAULT" {
                config.default_rpc = Some(value);
            } else if !network.is_empty() {
                config.rpc_urls.insert(network.to_lowercase(), value);
            }
        }
        config
    }

    /// The network's own endpoint, else `RPC_DEFAULT`.
    pub fn rpc_url_for(&self, network: Option<&str>) -> Option<&str> {
        let network = network.map(|n| n.trim().to_lowercase()).filter(|n| !n.is_empty());
        let specific = network.and_then(|network| {
            let canonical = NETWORK_ALIASES
                .iter()
                .find(|(alias, _)| *alias == network)
                .map(|(_, name)| *name)
                .unwrap_or(network.as_str());
            self.rpc_urls
                .get(canonical)
                .or_else(|| self.rpc_urls.get(&network))
                .map(String::as_str)
        });
        specific.or(self.default_rpc.as_deref())
    }

    pub fn networks(&self) -> Vec<&str> {
        let mut networks: Vec<&str> = self.rpc_urls.keys().map(String::as_str).collect();
        networks.sort_unstable();
        networks
    }
}

/// What the chain says about a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OnchainStatus {
    /// No endpoint for the network; nothing was checked.
    NoRpcConfigured,
    NotMined { transaction_found: bool },
    Confirmed { block_number: u64, confirmations: u64 },
    Reverted { block_number: u64, confirmations: u64 },
}

impl OnchainStatus {
    /// Whether a receipt was read from the chain.
    pub fn is_onchain(&self) -> bool {
        matches!(
            self,
            OnchainStatus::Confirmed { .. } | OnchainStatus::Reverted { .. }
        )
    }
}

/// The settlement an on-chain check looks at: the first payment carrying a
/// transaction hash, or the first payment when none does.
pub fn candidate_payment(payments: &[SettlementPayment]) -> Option<&SettlementPayment> {
    payments
        .iter()
        .find(|payment| payment.transaction_hash.is_some())
        .or_else(|| payments.first())
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: JsonValue,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn parse_quantity(value: &str) -> Option<u64> {
    u64::from_str_radix(value.trim().trim_start_matches("0x"), 16).ok()
}

/// Reads transaction receipts over EVM JSON-RPC.
#[derive(Debug, Clone)]
pub struct OnchainVerifier {
    http_client: Client,
    config: OnchainConfig,
}

impl OnchainVerifier {
    pub fn new(config: OnchainConfig) -> PaymentResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PaymentError::ConfigurationError {
                provider: "onchain".to_string(),
                message: format!("failed to create RPC client: {}", e),
            })?;

        info!(
            networks = ?config.networks(),
            default_rpc_configured = config.default_rpc.is_some(),
            "on-chain verifier initialized"
        );
        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(OnchainConfig::from_env())
    }

    pub fn config(&self) -> &OnchainConfig {
        &self.config
    }

    pub async fn check(&self, network: Option<&str>, tx_hash: &str) -> PaymentResult<OnchainStatus> {
        let Some(rpc_url) = self.config.rpc_url_for(network) else {
            debug!(network = ?network, tx_hash = %tx_hash, "no RPC endpoint for network");
            return Ok(OnchainStatus::NoRpcConfigured);
        };

        let receipt = self
            .call(rpc_url, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if receipt.is_null() {
            let transaction = self
                .call(rpc_url, "eth_getTransactionByHash", json!([tx_hash]))
                .await?;
            return Ok(OnchainStatus::NotMined {
                transaction_found: !transaction.is_null(),
            });
        }

        let receipt: TransactionReceipt =
            serde_json::from_value(receipt).map_err(|e| PaymentError::ProviderError {
                provider: "onchain".to_string(),
                message: format!("invalid transaction receipt: {}", e),
                provider_code: None,
                retryable: false,
            })?;
        let block_number = receipt
            .block_number
            .as_deref()
            .and_then(parse_quantity)
            .unwrap_or(0);
        let confirmations = if block_number == 0 {
            0
        } else {
            let head = self.call(rpc_url, "eth_blockNumber", json!([])).await?;
            head.as_str()
                .and_then(parse_quantity)
                .map(|head| head.saturating_sub(block_number) + 1)
                .unwrap_or(0)
        };

        let succeeded = receipt.status.as_deref().and_then(parse_quantity) == Some(1);
        let status = if succeeded {
            OnchainStatus::Confirmed {
                block_number,
                confirmations,
            }
        } else {
            OnchainStatus::Reverted {
                block_number,
                confirmations,
            }
        };
        info!(tx_hash = %tx_hash, network = ?network, status = ?status, "transaction receipt read");
        Ok(status)
    }

    async fn call(&self, rpc_url: &str, method: &str, params: JsonValue) -> PaymentResult<JsonValue> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let response = timeout(
            self.config.request_timeout,
            self.http_client.post(rpc_url).json(&body).send(),
        )
        .await
        .map_err(|_| PaymentError::NetworkError {
            message: format!(
                "{} timed out after {}s",
                method,
                self.config.request_timeout.as_secs()
            ),
        })?
        .map_err(|e| PaymentError::NetworkError {
            message: format!("RPC request {} failed: {}", method, e),
        })?;

        let response = response.error_for_status().map_err(|e| PaymentError::ProviderError {
            provider: "onchain".to_string(),
            message: format!("RPC endpoint error: {}", e),
            provider_code: e.status().map(|s| s.as_u16().to_string()),
            retryable: e.status().map(|s| s.is_server_error()).unwrap_or(false),
        })?;

        let parsed: RpcResponse = response.json().await.map_err(|e| PaymentError::ProviderError {
            provider: "onchain".to_string(),
            message: format!("invalid RPC response to {}: {}", method, e),
            provider_code: None,
            retryable: false,
        })?;
        if let Some(error) = parsed.error {
            warn!(method = %method, code = error.code, message = %error.message, "RPC call rejected");
            return Err(PaymentError::ProviderError {
                provider: "onchain".to_string(),
                message: error.message,
                provider_code: Some(error.code.to_string()),
                retryable: false,
            });
        }
        Ok(parsed.result)
    }
}
