//! File-based Configuration Provider
//!
//! Loads configuration from a JSON file. Nested objects are addressed with
//! dotted keys (`cache.capacity`).

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

/// File-based configuration provider
pub struct FileConfigProvider {
    path: PathBuf,
    data: RwLock<Option<serde_json::Value>>,
    auto_reload: bool,
}

impl FileConfigProvider {
    /// Create a new file provider; the file is read lazily on first access
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: RwLock::new(None),
            auto_reload: false,
        }
    }

    /// Create a file provider that re-reads the file on every lookup
    pub fn auto_reload(path: impl Into<PathBuf>) -> Self {
        Self {
            auto_reload: true,
            ..Self::new(path)
        }
    }

    /// A missing file is an empty configuration.
    async fn load(&self) -> ConfigResult<serde_json::Value> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(serde_json::Value::Object(Default::default()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_loaded(&self) -> ConfigResult<()> {
        let mut data = self.data.write().await;
        if data.is_none() || self.auto_reload {
            *data = Some(self.load().await?);
        }
        Ok(())
    }

    /// Reload configuration from file
    pub async fn reload(&self) -> ConfigResult<()> {
        let value = self.load().await?;
        *self.data.write().await = Some(value);
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        self.ensure_loaded().await?;

        let data = self.data.read().await;
        let Some(root) = data.as_ref() else {
            return Ok(None);
        };

        let found = root
            .get(key)
            .or_else(|| key.split('.').try_fold(root, |node, part| node.get(part)));

        Ok(match found {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Null) | None => None,
            Some(v) => Some(v.to_string()),
        })
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("auto_reload", &self.auto_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_nested_and_flat_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        tokio::fs::write(
            &path,
            r#"{"root": "/srv/plugins", "cache": {"capacity": 16}, "verify_on_hit": true}"#,
        )
        .await
        .unwrap();

        let provider = FileConfigProvider::new(&path);
        assert_eq!(
            provider.get_raw("root").await.unwrap().as_deref(),
            Some("/srv/plugins")
        );
        assert_eq!(
            provider.get_raw("cache.capacity").await.unwrap().as_deref(),
            Some("16")
        );
        assert_eq!(
            provider.get_raw("verify_on_hit").await.unwrap().as_deref(),
            Some("true")
        );
        assert!(provider.get_raw("cache.missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("absent.json"));
        assert!(provider.get_raw("root").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let provider = FileConfigProvider::new(&path);
        assert!(provider.get_raw("root").await.is_err());
    }

    #[tokio::test]
    async fn test_auto_reload_sees_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        tokio::fs::write(&path, r#"{"refresh": "manual"}"#).await.unwrap();

        let provider = FileConfigProvider::auto_reload(&path);
        assert_eq!(
            provider.get_raw("refresh").await.unwrap().as_deref(),
            Some("manual")
        );

        tokio::fs::write(&path, r#"{"refresh": "every-call"}"#)
            .await
            .unwrap();
        assert_eq!(
            provider.get_raw("refresh").await.unwrap().as_deref(),
            Some("every-call")
        );
    }
}
