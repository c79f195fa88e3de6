use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{
    CoinbaseProvider, MockConfig, MockProvider, PayMongoProvider, StripeProvider, XenditProvider,
};
use crate::payments::types::{PaymentMethod, ProviderName};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub card_provider: ProviderName,
    pub crypto_provider: ProviderName,
    /// `None` picks Xendit, then PayMongo, by which key is present, and the
    /// mock when neither is.
    pub ewallet_provider: Option<ProviderName>,
    /// `None` leaves Google Wallet off. Only the mock can serve it.
    pub googlewallet_provider: Option<ProviderName>,
    pub mock: MockConfig,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            card_provider: ProviderName::Stripe,
            crypto_provider: ProviderName::Coinbase,
            ewallet_provider: None,
            googlewallet_provider: None,
            mock: MockConfig::default(),
        }
    }
}

fn env_has(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let card_provider = std::env::var("CARD_PROVIDER").unwrap_or_else(|_| "stripe".to_string());
        let card_provider = ProviderName::from_str(&card_provider)?;

        let crypto_provider =
            std::env::var("CRYPTO_PROVIDER").unwrap_or_else(|_| "coinbase".to_string());
        let crypto_provider = ProviderName::from_str(&crypto_provider)?;

        let ewallet_raw = std::env::var("EWALLET_PROVIDER").unwrap_or_else(|_| "auto".to_string());
        let ewallet_provider = match ewallet_raw.trim().to_lowercase().as_str() {
            "" | "auto" => None,
            other => Some(ProviderName::from_str(other)?),
        };

        let googlewallet_raw =
            std::env::var("GOOGLEWALLET_PROVIDER").unwrap_or_else(|_| "off".to_string());
        let googlewallet_provider = match googlewallet_raw.trim().to_lowercase().as_str() {
            "" | "off" | "none" | "disabled" => None,
            other => Some(ProviderName::from_str(other)?),
        };

        let config = Self {
            card_provider,
            crypto_provider,
            ewallet_provider,
            googlewallet_provider,
            mock: MockConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        let allowed = |method: PaymentMethod, provider: ProviderName| {
            if provider == ProviderName::Mock || native_providers(method).contains(&provider) {
                Ok(())
            } else {
                Err(PaymentError::ValidationError {
                    message: format!("provider {} cannot serve {} payments", provider, method),
                    field: Some(format!("{}_PROVIDER", method.as_str().to_uppercase())),
                })
            }
        };
        allowed(PaymentMethod::Card, self.card_provider)?;
        allowed(PaymentMethod::Crypto, self.crypto_provider)?;
        if let Some(provider) = self.ewallet_provider {
            allowed(PaymentMethod::EWallet, provider)?;
        }
        if let Some(provider) = self.googlewallet_provider {
            allowed(PaymentMethod::GoogleWallet, provider)?;
        }
        Ok(())
    }

    /// `None` when the method is switched off.
    pub fn provider_for(&self, method: PaymentMethod) -> Option<ProviderName> {
        match method {
            PaymentMethod::Card => Some(self.card_provider),
            PaymentMethod::Crypto => Some(self.crypto_provider),
            PaymentMethod::EWallet => Some(self.ewallet_provider.unwrap_or_else(|| {
                if env_has("XENDIT_SECRET_KEY") {
                    ProviderName::Xendit
                } else if env_has("PAYMONGO_SECRET_KEY") {
                    ProviderName::PayMongo
                } else {
                    ProviderName::Mock
                }
            })),
            PaymentMethod::GoogleWallet => self.googlewallet_provider,
        }
    }
}

/// Live providers able to serve a method. The mock can serve any of them.
fn native_providers(method: PaymentMethod) -> &'static [ProviderName] {
    match method {
        PaymentMethod::Card => &[ProviderName::Stripe],
        PaymentMethod::Crypto => &[ProviderName::Coinbase],
        PaymentMethod::EWallet => &[ProviderName::Xendit, ProviderName::PayMongo],
        PaymentMethod::GoogleWallet => &[],
    }
}

/// The adapters serving each payment method, plus the reason any method is off.
#[derive(Clone, Default)]
pub struct ProviderSet {
    by_method: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
    disabled: HashMap<PaymentMethod, String>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: Arc<dyn PaymentProvider>) {
        let method = provider.method();
        self.disabled.remove(&method);
        self.by_method.insert(method, provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn disable(&mut self, method: PaymentMethod, reason: impl Into<String>) {
        self.by_method.remove(&method);
        self.disabled.insert(method, reason.into());
    }

    pub fn for_method(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.by_method.get(&method).cloned().ok_or_else(|| {
            PaymentError::ConfigurationError {
                provider: method.as_str().to_string(),
                message: self
                    .disabled
                    .get(&method)
                    .cloned()
                    .unwrap_or_else(|| format!("no provider configured for {} payments", method)),
            }
        })
    }

    /// Live provider by name. The mock never receives webhooks, so it is not addressable.
    pub fn by_name(&self, name: ProviderName) -> Option<Arc<dyn PaymentProvider>> {
        if name == ProviderName::Mock {
            return None;
        }
        self.by_method
            .values()
            .find(|provider| provider.name() == name)
            .cloned()
    }

    pub fn enabled(&self) -> Vec<(PaymentMethod, ProviderName)> {
        PaymentMethod::ALL
            .iter()
            .filter_map(|method| self.by_method.get(method).map(|p| (*method, p.name())))
            .collect()
    }

    pub fn disabled(&self) -> Vec<(PaymentMethod, String)> {
        PaymentMethod::ALL
            .iter()
            .filter_map(|method| self.disabled.get(method).map(|r| (*method, r.clone())))
            .collect()
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("enabled", &self.enabled())
            .field("disabled", &self.disabled())
            .finish()
    }
}

pub struct PaymentProviderFactory {
    config: PaymentFactoryConfig,
}

impl PaymentProviderFactory {
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        Ok(Self { config })
    }

    pub fn with_config(config: PaymentFactoryConfig) -> Self {
        Self { config }
    }

    /// `Ok(None)` when the method is switched off.
    pub fn build_provider(
        &self,
        method: PaymentMethod,
    ) -> PaymentResult<Option<Arc<dyn PaymentProvider>>> {
        let Some(name) = self.config.provider_for(method) else {
            return Ok(None);
        };
        let provider: Arc<dyn PaymentProvider> = match name {
            ProviderName::Stripe => Arc::new(StripeProvider::from_env()?),
            ProviderName::Coinbase => Arc::new(CoinbaseProvider::from_env()?),
            ProviderName::Xendit => Arc::new(XenditProvider::from_env()?),
            ProviderName::PayMongo => Arc::new(PayMongoProvider::from_env()?),
            ProviderName::Mock => Arc::new(MockProvider::new(method, self.config.mock.clone())),
        };
        Ok(Some(provider))
    }

    /// Builds every method's adapter. A method whose adapter cannot start is
    /// disabled on its own; the others stay available. Methods switched off
    /// are neither enabled nor reported as disabled.
    pub fn build_all(&self) -> ProviderSet {
        let mut set = ProviderSet::new();
        for method in PaymentMethod::ALL {
            match self.build_provider(method) {
                Ok(None) => {
                    info!(method = %method, "payment method switched off");
                }
                Ok(Some(provider)) => {
                    if provider.name() == ProviderName::Mock {
                        warn!(method = %method, "using mock provider, no live charges will be created");
                    } else {
                        info!(method = %method, provider = %provider.name(), "payment method enabled");
                    }
                    set.insert(provider);
                }
                Err(e) => {
                    error!(method = %method, error = %e, "payment method disabled");
                    set.disable(method, e.to_string());
                }
            }
        }
        set
    }
}
