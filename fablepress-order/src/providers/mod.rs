use std::collections::HashMap;
use std::sync::Arc;

use fablepress_core::models::FulfilmentProvider;
use fablepress_core::provider::ProviderAdapter;

pub mod blurb;
pub mod printful;

pub use blurb::BlurbAdapter;
pub use printful::PrintfulAdapter;

/// Lookup table from provider tag to adapter. Routing and webhook handling
/// both select adapters here instead of branching on the enum.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<FulfilmentProvider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: FulfilmentProvider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_selects_adapter_by_provider() {
        let registry = ProviderRegistry::new()
            .register(Arc::new(PrintfulAdapter::new(
                "https://api.printful.test".to_string(),
                Some("key".to_string()),
                Some("secret".to_string()),
            )))
            .register(Arc::new(BlurbAdapter::new(
                "https://api.blurb.test".to_string(),
                Some("key".to_string()),
                Some("token".to_string()),
            )));

        assert_eq!(
            registry
                .get(FulfilmentProvider::Printful)
                .map(|a| a.provider()),
            Some(FulfilmentProvider::Printful)
        );
        assert_eq!(
            registry.get(FulfilmentProvider::Blurb).map(|a| a.provider()),
            Some(FulfilmentProvider::Blurb)
        );
    }
}
