//! Service configuration read from the environment (and `.env` when present).
//!
//! Provider credentials are not here: each adapter reads its own through
//! `PaymentFactoryConfig` so a missing key disables one method, not the service.

use std::env;
use std::str::FromStr;

use crate::services::payment_orchestrator::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub webhooks: WebhookConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` overrides it
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Reject events from providers that have no shared secret configured.
    pub require_signatures: bool,
    pub queue_capacity: usize,
}

/// Reads `name`, falling back to `default` when unset. A set but unparseable
/// value is an error rather than a silent default.
pub fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", name, raw))),
        _ => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!("{}={}", name, raw))),
        },
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            webhooks: WebhookConfig::from_env()?,
            orchestrator: OrchestratorConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.webhooks.validate()?;
        self.orchestrator.validate()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env_parse("SERVER_HOST", "0.0.0.0".to_string())?,
            port: env_parse("SERVER_PORT", 5000u16)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "SERVER_PORT must be non-zero".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "SERVER_HOST must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match env_parse("LOG_FORMAT", "plain".to_string())?
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            "plain" | "text" | "pretty" => LogFormat::Plain,
            other => return Err(ConfigError::InvalidValue(format!("LOG_FORMAT={}", other))),
        };
        Ok(LoggingConfig {
            level: env_parse("LOG_LEVEL", "info".to_string())?,
            format,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !Self::LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue(format!("LOG_LEVEL={}", self.level)));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            require_signatures: env_flag("WEBHOOK_REQUIRE_SIGNATURES", false)?,
            queue_capacity: env_parse("WEBHOOK_QUEUE_CAPACITY", 1024usize)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "WEBHOOK_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            require_signatures: false,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<crate::payments::error::PaymentError> for ConfigError {
    fn from(err: crate::payments::error::PaymentError) -> Self {
        ConfigError::ValidationFailed(err.to_string())
    }
}
