//! Marketplace descriptor schema (`.claude-plugin/marketplace.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use super::element::ElementKind;

const PLUGIN_CONFIG_DIR: &str = ".claude-plugin";
const MARKETPLACE_FILE: &str = "marketplace.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceOwner {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Top-level descriptor. Plugin entries stay raw so one malformed entry
/// does not reject the whole marketplace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketplaceManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<MarketplaceOwner>,
    #[serde(default)]
    pub metadata: Option<DescriptorMetadata>,
    #[serde(default)]
    pub plugins: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSource {
    /// Directory relative to the marketplace root, e.g. `./plugins/foo`.
    Path(String),
    /// `{"source": "github", "repo": "..."}` and similar; not installed locally.
    Remote {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginAuthor {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl PluginAuthor {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }
}

/// A declared element: either a path string or an object with a `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementRef {
    Path(String),
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl ElementRef {
    /// Explicit `name`, else the final path component without extension.
    pub fn display_name(&self) -> Option<String> {
        match self {
            Self::Named { name, .. } => Some(name.clone()),
            Self::Path(path) => crate::common::element_stem(Path::new(path)),
        }
    }

    /// Path relative to the plugin directory that holds this element.
    pub fn relative_path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Named { path, .. } => path.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PluginSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PluginAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<ElementRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<ElementRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<ElementRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DescriptorMetadata>,
}

impl PluginEntry {
    pub fn declared(&self, kind: ElementKind) -> Option<&[ElementRef]> {
        match kind {
            ElementKind::Skill => self.skills.as_deref(),
            ElementKind::Agent => self.agents.as_deref(),
            ElementKind::Command => self.commands.as_deref(),
        }
    }

    /// Plugin-level value, falling back to the entry's own `metadata` block.
    pub fn effective_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or_else(|| self.metadata.as_ref()?.description.as_deref())
    }

    pub fn effective_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or_else(|| self.metadata.as_ref()?.version.as_deref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("descriptor is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarketplaceManifest {
    pub fn descriptor_path(marketplace_dir: &Path) -> std::path::PathBuf {
        marketplace_dir.join(PLUGIN_CONFIG_DIR).join(MARKETPLACE_FILE)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reads and parses a descriptor, refusing files over `max_bytes`.
    pub async fn load(path: &Path, max_bytes: u64) -> Result<Self, ManifestError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        if size > max_bytes {
            return Err(ManifestError::TooLarge {
                size,
                limit: max_bytes,
            });
        }

        let mut buf = Vec::with_capacity(size as usize);
        file.take(max_bytes.saturating_add(1)).read_to_end(&mut buf).await?;
        if buf.len() as u64 > max_bytes {
            return Err(ManifestError::TooLarge {
                size: buf.len() as u64,
                limit: max_bytes,
            });
        }

        Ok(serde_json::from_slice(&buf)?)
    }
}
