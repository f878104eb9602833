//! Settings for the plugin catalog service.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigResult, ValidationErrors};

pub const DEFAULT_CACHE_CAPACITY: usize = 32;
pub const DEFAULT_MAX_ELEMENT_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_DESCRIPTOR_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// When the marketplace index is rebuilt from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Rebuild before every operation (CLI-scale use).
    EveryCall,
    /// Rebuild when the last build is older than the interval.
    Interval(Duration),
    /// Build once lazily; afterwards only on explicit refresh.
    Manual,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::Interval(DEFAULT_REFRESH_INTERVAL)
    }
}

impl FromStr for RefreshPolicy {
    type Err = String;

    /// Accepts `every-call`, `manual`, or a number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every-call" | "every_call" | "always" => Ok(Self::EveryCall),
            "manual" | "never" => Ok(Self::Manual),
            other => other
                .trim_end_matches('s')
                .parse::<u64>()
                .map(|secs| Self::Interval(Duration::from_secs(secs)))
                .map_err(|_| {
                    format!("expected 'every-call', 'manual' or seconds, got '{other}'")
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Repository root; the security boundary for every read.
    pub root: PathBuf,
    pub cache_capacity: usize,
    pub max_element_bytes: u64,
    pub max_descriptor_bytes: u64,
    pub io_timeout: Duration,
    pub refresh: RefreshPolicy,
    /// Re-stat cached element files on every hit and reload when they changed.
    pub verify_on_hit: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_element_bytes: DEFAULT_MAX_ELEMENT_BYTES,
            max_descriptor_bytes: DEFAULT_MAX_DESCRIPTOR_BYTES,
            io_timeout: DEFAULT_IO_TIMEOUT,
            refresh: RefreshPolicy::default(),
            verify_on_hit: false,
        }
    }
}

impl CatalogConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// `~/.claude/plugins`, falling back to a relative path without a home directory.
    pub fn default_root() -> PathBuf {
        crate::common::home_dir()
            .map(|home| home.join(".claude").join("plugins"))
            .unwrap_or_else(|| PathBuf::from(".claude").join("plugins"))
    }

    pub fn marketplaces_dir(&self) -> PathBuf {
        self.root.join(crate::plugins::MARKETPLACES_DIR)
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_max_element_bytes(mut self, bytes: u64) -> Self {
        self.max_element_bytes = bytes;
        self
    }

    pub fn with_max_descriptor_bytes(mut self, bytes: u64) -> Self {
        self.max_descriptor_bytes = bytes;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_verify_on_hit(mut self, verify: bool) -> Self {
        self.verify_on_hit = verify;
        self
    }

    /// Reads every known key from `provider`, keeping defaults for absent ones.
    ///
    /// Keys: `root`, `cache.capacity`, `max_element_bytes`,
    /// `max_descriptor_bytes`, `io_timeout_ms`, `refresh`, `verify_on_hit`.
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(root) = provider.get_raw("root").await? {
            config.root = PathBuf::from(root.trim());
        }
        if let Some(capacity) = provider.get_parsed("cache.capacity").await? {
            config.cache_capacity = capacity;
        }
        if let Some(bytes) = provider.get_parsed("max_element_bytes").await? {
            config.max_element_bytes = bytes;
        }
        if let Some(bytes) = provider.get_parsed("max_descriptor_bytes").await? {
            config.max_descriptor_bytes = bytes;
        }
        if let Some(ms) = provider.get_parsed::<u64>("io_timeout_ms").await? {
            config.io_timeout = Duration::from_millis(ms);
        }
        if let Some(refresh) = provider.get_parsed("refresh").await? {
            config.refresh = refresh;
        }
        if let Some(verify) = provider.get_parsed("verify_on_hit").await? {
            config.verify_on_hit = verify;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads from `CLAUDE_PLUGINS_*` environment variables.
    pub async fn from_env() -> ConfigResult<Self> {
        Self::load(&super::EnvConfigProvider::catalog()).await
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.root.as_os_str().is_empty() {
            errors.push(invalid("root", "must not be empty"));
        }
        if self.max_element_bytes == 0 {
            errors.push(invalid("max_element_bytes", "must be greater than zero"));
        }
        if self.max_descriptor_bytes == 0 {
            errors.push(invalid("max_descriptor_bytes", "must be greater than zero"));
        }
        if self.io_timeout.is_zero() {
            errors.push(invalid("io_timeout_ms", "must be greater than zero"));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(ValidationErrors(errors))),
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
