//! Environment Variable Configuration Provider
//!
//! Environment variables are treated as immutable at runtime.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Prefix used by [`EnvConfigProvider::catalog`].
pub const CATALOG_ENV_PREFIX: &str = "CLAUDE_PLUGINS_";

/// Read-only environment variable configuration provider.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment provider with no prefix
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Create an environment provider with a prefix
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Provider for the `CLAUDE_PLUGINS_*` variables
    pub fn catalog() -> Self {
        Self::prefixed(CATALOG_ENV_PREFIX)
    }

    /// `cache.capacity` → `CLAUDE_PLUGINS_CACHE_CAPACITY`
    fn env_key(&self, key: &str) -> String {
        let key = key.to_uppercase().replace('.', "_");
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key,
        }
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        let env_key = self.env_key(key);
        match std::env::var(&env_key) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }
}
