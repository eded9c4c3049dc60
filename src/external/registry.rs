use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::external::fred::FredProvider;
use crate::external::provider::{DataProvider, ProviderError};
use crate::external::yahoo::YahooProvider;
use crate::external::yahoo_forex::YahooForexProvider;
use crate::models::AssetType;

/// Maps asset types to their provider adapters. Built once at startup and
/// carried by handle; there is no lazily initialized global to reset.
pub struct ProviderRegistry {
    providers: HashMap<AssetType, Arc<dyn DataProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// The default wiring: Yahoo chart data for the market-data asset types
    /// and for forex pairs, FRED for bond yields and economic indicators.
    /// FRED needs an API key; without one those types stay unregistered and
    /// jobs against them fail with a configuration error.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let yahoo: Arc<dyn DataProvider> = Arc::new(YahooProvider::new());
        registry.register(AssetType::Stock, yahoo.clone());
        registry.register(AssetType::Crypto, yahoo.clone());
        registry.register(AssetType::Commodity, yahoo);

        registry.register(AssetType::Forex, Arc::new(YahooForexProvider::new()));

        match FredProvider::from_env() {
            Ok(fred) => {
                let fred: Arc<dyn DataProvider> = Arc::new(fred);
                registry.register(AssetType::Bond, fred.clone());
                registry.register(AssetType::EconomicIndicator, fred);
            }
            Err(e) => {
                warn!("FRED provider not registered: {}", e);
            }
        }

        registry
    }

    pub fn register(&mut self, asset_type: AssetType, provider: Arc<dyn DataProvider>) {
        self.providers.insert(asset_type, provider);
    }

    pub fn get(&self, asset_type: AssetType) -> Result<Arc<dyn DataProvider>, ProviderError> {
        self.providers.get(&asset_type).cloned().ok_or_else(|| {
            ProviderError::Config(format!(
                "No data provider registered for asset type '{}'",
                asset_type
            ))
        })
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_market_data_and_forex_types() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.get(AssetType::Stock).is_ok());
        assert!(registry.get(AssetType::Crypto).is_ok());
        assert!(registry.get(AssetType::Commodity).is_ok());
        assert!(registry.get(AssetType::Forex).is_ok());
    }

    #[test]
    fn test_missing_provider_is_config_error() {
        let registry = ProviderRegistry::new();
        match registry.get(AssetType::Bond) {
            Err(ProviderError::Config(msg)) => assert!(msg.contains("bond")),
            Err(other) => panic!("expected config error, got {}", other),
            Ok(_) => panic!("expected config error, got a provider"),
        }
    }
}
