//! Configuration Provider Trait

use std::str::FromStr;

use super::{ConfigError, ConfigResult};

/// Read-only source of raw configuration values
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Get a raw configuration value
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;
}

/// Extension methods for typed configuration access
pub trait ConfigProviderExt: ConfigProvider {
    /// Get a value parsed with `FromStr`
    fn get_parsed<T>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        T: FromStr + Send,
        T::Err: std::fmt::Display,
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                None => Ok(None),
            }
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
