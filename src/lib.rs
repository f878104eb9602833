//! # claude-plugin-catalog
//!
//! Read-only catalog over a local Claude Code plugin repository.
//!
//! The repository is a tree of marketplaces, each declaring plugins in a
//! `.claude-plugin/marketplace.json` descriptor; every plugin carries skills,
//! agents and commands as markdown files. [`PluginService`] resolves plugin
//! names against the marketplace index, keeps every filesystem access inside
//! the repository root, and serves loaded elements through a bounded cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use claude_plugin_catalog::{CatalogConfig, ElementKind, PluginService, RefreshPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), claude_plugin_catalog::Error> {
//!     let config = CatalogConfig::default().with_refresh(RefreshPolicy::Manual);
//!     let service = Arc::new(PluginService::new(config)?);
//!
//!     for plugin in service.list_plugins().await? {
//!         println!("{} from {}", plugin.name, plugin.marketplace);
//!     }
//!
//!     let loaded = service.load_elements("formatter", Some(ElementKind::Skill)).await?;
//!     for failure in loaded.failures() {
//!         eprintln!("{}: {}", failure.path.display(), failure.reason);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod common;
pub mod config;
pub mod plugins;
pub mod security;

use std::path::PathBuf;

pub use cache::{CacheStats, LruMap, ResultCache};
pub use config::{
    CatalogConfig, CompositeConfigProvider, ConfigBuilder, ConfigError, ConfigProvider,
    EnvConfigProvider, FileConfigProvider, MemoryConfigProvider, RefreshPolicy,
};
pub use plugins::{
    Element, ElementFailure, ElementKind, ElementLoader, ElementPayload, ElementRecord,
    ElementSelector, IndexReport, IndexSnapshot, IndexWarning, LoadedElements, Marketplace, MarketplaceIndex,
    Plugin, PluginDetail, PluginService, PluginSummary,
};
pub use security::{PathGuard, SecurityError};

/// Error type for catalog operations.
///
/// `Clone` so a single failed load can be handed to every caller waiting on it.
/// Messages carry paths and kinds, never file contents.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed name input; rejected before any filesystem access.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A resolved path escapes its root.
    #[error("Path escapes repository root: {path}")]
    PathTraversal { path: PathBuf },

    #[error("Plugin not found: {name}")]
    PluginNotFound { name: String },

    #[error("No {kind} named '{name}' in plugin '{plugin}'")]
    ElementNotFound {
        plugin: String,
        kind: ElementKind,
        name: String,
    },

    /// I/O failure, oversize file, timeout or parse failure.
    #[error("Failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The repository root exists but cannot be read.
    #[error("Plugin repository {path} is not accessible: {reason}")]
    Index { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error kind for transports that map errors onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input (400)
    InvalidInput,
    /// Valid input naming something that does not exist (404)
    NotFound,
    /// Filesystem or configuration problems (500)
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidName { .. } | Error::PathTraversal { .. } => ErrorKind::InvalidInput,
            Error::PluginNotFound { .. } | Error::ElementNotFound { .. } => ErrorKind::NotFound,
            Error::Load { .. } | Error::Index { .. } | Error::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::InvalidValue { key, message } => {
                Error::Config(format!("Invalid value for {}: {}", key, message))
            }
            config::ConfigError::ValidationErrors(errors) => Error::Config(errors.to_string()),
            other => Error::Config(other.to_string()),
        }
    }
}

impl From<security::SecurityError> for Error {
    fn from(err: security::SecurityError) -> Self {
        match err {
            security::SecurityError::InvalidName { name, reason } => {
                Error::InvalidName { name, reason }
            }
            security::SecurityError::PathEscape(path)
            | security::SecurityError::AbsolutePath(path) => Error::PathTraversal { path },
            security::SecurityError::Io { path, message, .. } => Error::Load {
                path,
                reason: message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
