//! In-Memory Configuration Provider
//!
//! Useful for testing and code-defined configuration.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

/// In-memory configuration provider
#[derive(Debug, Default)]
pub struct MemoryConfigProvider {
    data: RwLock<HashMap<String, String>>,
    name: String,
}

impl MemoryConfigProvider {
    /// Create a new empty memory provider
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a memory provider with a custom name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }

    /// Create a memory provider with initial data
    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
            name: "memory".to_string(),
        }
    }

    /// Add an initial value during construction (builder pattern)
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.get_mut().insert(key.into(), value.into());
        self
    }

    /// Insert a value asynchronously
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    /// Get the number of stored values
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Check if empty
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }
}
