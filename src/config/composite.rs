//! Composite Configuration Provider
//!
//! Chains multiple configuration providers with priority ordering.
//! Earlier providers have higher priority.

use super::ConfigResult;
use super::provider::ConfigProvider;

/// Composite configuration provider that chains multiple providers
#[derive(Default)]
pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    /// Create a new empty composite provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider (first added = highest priority)
    pub fn add_provider(&mut self, provider: Box<dyn ConfigProvider>) {
        self.providers.push(provider);
    }

    /// Add a provider and return self (for chaining)
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Get the number of providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Get provider names
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for provider in &self.providers {
            if let Some(value) = provider.get_raw(key).await? {
                tracing::debug!(key, provider = provider.name(), "Config value resolved");
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("provider_count", &self.providers.len())
            .field("provider_names", &self.provider_names())
            .finish()
    }
}
