//! Provider registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::adapter::ProviderAdapter;

/// Adapters keyed by provider id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every adapter compiled into this build
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "openai")]
        registry.register(Arc::new(crate::openai::OpenAIAdapter::new()));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(crate::anthropic::AnthropicAdapter::new()));
        #[cfg(feature = "google")]
        registry.register(Arc::new(crate::google::GoogleAdapter::new()));
        #[cfg(feature = "azure")]
        registry.register(Arc::new(crate::azure::AzureOpenAIAdapter::new()));
        registry
    }

    /// Register an adapter, replacing any adapter with the same id
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.provider_id().to_string();
        debug!(provider = %id, "Registering provider adapter");
        self.adapters.insert(id, adapter);
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Adapter for a provider id
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    /// Whether an adapter is registered
    pub fn contains(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
