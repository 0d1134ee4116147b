use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};

use gridx_core::config::ChainSection;
use gridx_core::currency::Currency;
use gridx_core::error::GridxError;

use crate::adapter::{ChainAdapter, JsonRpcAdapter, StubAdapter};

/// Per-currency adapter registry. The set of keys here IS the set of
/// currencies this process can settle in.
pub struct AdapterRegistry {
    adapters: BTreeMap<Currency, ChainAdapter>,
}

impl AdapterRegistry {
    /// Build adapters for `currencies` from configuration: a JSON-RPC
    /// adapter where an endpoint is configured, otherwise a stub when stubs
    /// are enabled. A currency with neither is left unsupported.
    pub fn from_config(
        config: &ChainSection,
        currencies: &[Currency],
    ) -> Result<Self, GridxError> {
        let timeout = Duration::from_secs(config.rpc_timeout_s);
        let mut adapters = BTreeMap::new();
        for &currency in currencies {
            if let Some(url) = config.endpoints.get(currency.symbol()) {
                adapters.insert(
                    currency,
                    ChainAdapter::JsonRpc(JsonRpcAdapter::new(currency, url, timeout)?),
                );
                info!(currency = %currency, url = %url, "chain adapter: json-rpc");
            } else if config.use_stub_adapters {
                adapters.insert(currency, ChainAdapter::Stub(StubAdapter::new(currency)));
                info!(currency = %currency, "chain adapter: stub");
            } else {
                warn!(currency = %currency, "no endpoint configured and stubs disabled; currency unsupported");
            }
        }
        Ok(Self { adapters })
    }

    pub fn get(&self, currency: Currency) -> Result<&ChainAdapter, GridxError> {
        self.adapters
            .get(&currency)
            .ok_or_else(|| GridxError::UnsupportedCurrency(currency.symbol().to_string()))
    }

    pub fn supported_currencies(&self) -> Vec<Currency> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stubs_cover_requested_currencies() {
        let registry = AdapterRegistry::from_config(
            &ChainSection::default(),
            &[Currency::Flop, Currency::Btc],
        )
        .unwrap();
        assert_eq!(
            registry.supported_currencies(),
            vec![Currency::Flop, Currency::Btc]
        );
        assert!(registry.get(Currency::Flop).is_ok());
        assert!(matches!(
            registry.get(Currency::Eth),
            Err(GridxError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn stubs_disabled_without_endpoints_leaves_nothing() {
        let config = ChainSection { use_stub_adapters: false, ..ChainSection::default() };
        let registry = AdapterRegistry::from_config(&config, &[Currency::Flop]).unwrap();
        assert!(registry.supported_currencies().is_empty());
    }

    #[test]
    fn endpoint_takes_precedence_over_stub() {
        let mut config = ChainSection::default();
        config
            .endpoints
            .insert("FLOP".into(), "http://127.0.0.1:32553".into());
        let registry = AdapterRegistry::from_config(&config, &[Currency::Flop]).unwrap();
        assert!(matches!(
            registry.get(Currency::Flop).unwrap(),
            ChainAdapter::JsonRpc(_)
        ));
    }
}
