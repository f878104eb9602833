//! Pluggable configuration provider system.
//!
//! ```rust,no_run
//! use claude_plugin_catalog::config::{CatalogConfig, ConfigBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ConfigBuilder::new()
//!     .env_with_prefix("CLAUDE_PLUGINS_")
//!     .file("catalog.json")
//!     .build();
//! let config = CatalogConfig::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod composite;
pub mod env;
pub mod file;
pub mod memory;
pub mod provider;

pub use catalog::{CatalogConfig, RefreshPolicy};
pub use composite::CompositeConfigProvider;
pub use env::EnvConfigProvider;
pub use file::FileConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use thiserror::Error;

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// Multiple validation errors
    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration builder for fluent API
#[derive(Default)]
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add environment variable provider
    pub fn env(mut self) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::new()));
        self
    }

    /// Add environment variable provider with prefix
    pub fn env_with_prefix(mut self, prefix: &str) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::prefixed(prefix)));
        self
    }

    /// Add file provider
    pub fn file(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.providers
            .push(Box::new(FileConfigProvider::new(path.as_ref())));
        self
    }

    /// Add memory provider
    pub fn memory(mut self, provider: MemoryConfigProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Add a custom provider
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the composite configuration
    pub fn build(self) -> CompositeConfigProvider {
        let mut composite = CompositeConfigProvider::new();
        for provider in self.providers {
            composite.add_provider(provider);
        }
        composite
    }
}
