//! Public operations over the marketplace index, element loader and cache.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::element::{Element, ElementKind, ElementRecord, ElementSelector, LoadedElements};
use super::index::{IndexSnapshot, IndexWarning, MarketplaceIndex, Plugin, SnapshotDiff};
use super::loader::ElementLoader;
use super::manifest::{DescriptorMetadata, MarketplaceOwner, PluginAuthor};
use crate::cache::{CacheStats, ResultCache};
use crate::config::{CatalogConfig, RefreshPolicy};
use crate::security::PathGuard;
use crate::{Error, Result};

/// Cache key: one entry per plugin and kind filter.
///
/// The fingerprint ties an entry to the descriptor entry it was loaded from,
/// so a snapshot with a changed entry never resolves to an older load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub plugin: String,
    pub fingerprint: u64,
    pub filter: Option<ElementKind>,
}

impl CacheKey {
    fn new(plugin: &Plugin, filter: Option<ElementKind>) -> Self {
        Self {
            plugin: plugin.name.clone(),
            fingerprint: plugin.fingerprint,
            filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    pub name: String,
    pub marketplace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<PluginAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl PluginSummary {
    pub fn from_plugin(plugin: &Plugin) -> Self {
        Self {
            name: plugin.name.clone(),
            marketplace: plugin.marketplace.clone(),
            description: plugin.description().map(str::to_string),
            version: plugin.version().map(str::to_string),
            author: plugin.author().cloned(),
            category: plugin.entry.category.clone(),
            keywords: plugin.entry.keywords.clone(),
            skills: plugin.declared_names(ElementKind::Skill),
            agents: plugin.declared_names(ElementKind::Agent),
            commands: plugin.declared_names(ElementKind::Command),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDetail {
    #[serde(flatten)]
    pub summary: PluginSummary,
    pub location: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<MarketplaceOwner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_metadata: Option<DescriptorMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub marketplaces: usize,
    pub plugins: usize,
    pub warnings: Vec<IndexWarning>,
    pub diff: SnapshotDiff,
}

/// Read-only catalog over a local plugin repository.
///
/// Owns the marketplace index and the element cache; share it behind an
/// `Arc` for concurrent callers.
///
/// ```rust,no_run
/// use claude_plugin_catalog::{CatalogConfig, ElementKind, PluginService};
///
/// # async fn example() -> claude_plugin_catalog::Result<()> {
/// let service = PluginService::new(CatalogConfig::new("/home/me/.claude/plugins"))?;
/// for plugin in service.list_plugins().await? {
///     println!("{} ({})", plugin.name, plugin.marketplace);
/// }
/// let skills = service.load_elements("formatter", Some(ElementKind::Skill)).await?;
/// println!("{} skills", skills.elements().count());
/// # Ok(())
/// # }
/// ```
pub struct PluginService {
    config: CatalogConfig,
    index: MarketplaceIndex,
    loader: Arc<ElementLoader>,
    cache: ResultCache<CacheKey, LoadedElements, Error>,
    last_refresh: Mutex<Option<Instant>>,
}

impl PluginService {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            index: MarketplaceIndex::new(&config),
            loader: Arc::new(ElementLoader::from_config(&config)),
            cache: ResultCache::new(config.cache_capacity),
            last_refresh: Mutex::new(None),
            config,
        })
    }

    /// Builds a service from `CLAUDE_PLUGINS_*` environment variables.
    pub async fn from_env() -> Result<Self> {
        Self::new(CatalogConfig::from_env().await?)
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// The last built snapshot, without refreshing.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.index.snapshot()
    }

    pub async fn list_plugins(&self) -> Result<Vec<PluginSummary>> {
        let snapshot = self.ensure_fresh().await?;
        Ok(snapshot
            .plugins
            .iter()
            .map(|p| PluginSummary::from_plugin(p))
            .collect())
    }

    /// Summary plus location and the owning marketplace's owner and metadata.
    pub async fn describe_plugin(&self, name: &str) -> Result<PluginDetail> {
        let (snapshot, plugin) = self.resolve(name).await?;
        let marketplace = snapshot.marketplace(&plugin.marketplace);
        let market_meta = marketplace.and_then(|m| m.metadata.as_ref());

        let mut summary = PluginSummary::from_plugin(&plugin);
        if summary.description.is_none() {
            summary.description = market_meta.and_then(|m| m.description.clone());
        }
        if summary.version.is_none() {
            summary.version = market_meta.and_then(|m| m.version.clone());
        }

        Ok(PluginDetail {
            summary,
            location: plugin.location.clone(),
            owner: marketplace.and_then(|m| m.owner.clone()),
            marketplace_metadata: market_meta.cloned(),
        })
    }

    /// Loads the elements of `name`, optionally restricted to one kind.
    ///
    /// Results are cached per `(name, filter)`; per-element problems are
    /// returned inline as [`ElementRecord::Failed`].
    pub async fn load_elements(
        &self,
        name: &str,
        filter: Option<ElementKind>,
    ) -> Result<Arc<LoadedElements>> {
        let (snapshot, plugin) = self.resolve(name).await?;
        self.verify_location(&snapshot, &plugin).await?;

        let key = CacheKey::new(&plugin, filter);
        let loaded = self.cached_load(key.clone(), Arc::clone(&plugin)).await?;

        if self.config.verify_on_hit && !loaded.stamp.is_current().await {
            tracing::debug!(plugin = %name, "Cached elements changed on disk, reloading");
            self.invalidate_plugin(name);
            return self.cached_load(key, plugin).await;
        }
        Ok(loaded)
    }

    /// Loads a single element through the same cache as [`Self::load_elements`].
    pub async fn load_element(
        &self,
        plugin: &str,
        kind: ElementKind,
        element: &str,
    ) -> Result<Element> {
        let loaded = self.load_elements(plugin, Some(kind)).await?;
        match loaded.find(kind, element) {
            Some(ElementRecord::Loaded(found)) => Ok(found.clone()),
            Some(ElementRecord::Failed(failure)) => Err(Error::Load {
                path: failure.path.clone(),
                reason: failure.reason.clone(),
            }),
            None => Err(Error::ElementNotFound {
                plugin: plugin.to_string(),
                kind,
                name: element.to_string(),
            }),
        }
    }

    /// Loads the elements named by `selectors`, in request order.
    ///
    /// Each distinct kind is served from the same cache entry as
    /// `load_elements(plugin, Some(kind))`. Selectors naming no element are
    /// skipped; repeated selectors are returned once.
    pub async fn load_selected(
        &self,
        plugin: &str,
        selectors: &[ElementSelector],
    ) -> Result<Vec<ElementRecord>> {
        PathGuard::validate_segment(plugin)?;

        let mut by_kind: Vec<(ElementKind, Arc<LoadedElements>)> = Vec::new();
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(selectors.len());

        for selector in selectors {
            if !seen.insert(selector) {
                continue;
            }

            let cached = by_kind
                .iter()
                .find(|(kind, _)| *kind == selector.kind)
                .map(|(_, loaded)| Arc::clone(loaded));
            let loaded = match cached {
                Some(loaded) => loaded,
                None => {
                    let loaded = self.load_elements(plugin, Some(selector.kind)).await?;
                    by_kind.push((selector.kind, Arc::clone(&loaded)));
                    loaded
                }
            };

            match loaded.find(selector.kind, &selector.name) {
                Some(record) => records.push(record.clone()),
                None => tracing::debug!(
                    plugin,
                    kind = %selector.kind,
                    name = %selector.name,
                    "Selected element not found, skipping"
                ),
            }
        }
        Ok(records)
    }

    /// Rebuilds the index now, regardless of the refresh policy.
    pub async fn refresh(&self) -> Result<IndexReport> {
        let observed = self.index.snapshot().generation;
        let refreshed = self
            .index
            .refresh_since(observed, |diff| self.after_refresh(diff))
            .await?;

        let snapshot = refreshed.snapshot;
        Ok(IndexReport {
            generation: snapshot.generation,
            built_at: snapshot.built_at,
            marketplaces: snapshot.marketplaces.len(),
            plugins: snapshot.plugins.len(),
            warnings: snapshot.warnings.clone(),
            diff: refreshed.diff,
        })
    }

    /// Drops every cached entry for `name`, across fingerprints. Returns the
    /// number removed.
    pub fn invalidate_plugin(&self, name: &str) -> usize {
        self.cache.invalidate_where(|key| key.plugin == name)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn resolve(&self, name: &str) -> Result<(Arc<IndexSnapshot>, Arc<Plugin>)> {
        PathGuard::validate_segment(name)?;
        let snapshot = self.ensure_fresh().await?;
        let plugin = snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                name: name.to_string(),
            })?;
        Ok((snapshot, plugin))
    }

    async fn ensure_fresh(&self) -> Result<Arc<IndexSnapshot>> {
        let current = self.index.snapshot();
        let due = match self.config.refresh {
            RefreshPolicy::EveryCall => true,
            RefreshPolicy::Interval(interval) => self
                .last_refresh
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_none_or(|at| at.elapsed() >= interval),
            RefreshPolicy::Manual => !current.is_built(),
        };

        if !due {
            return Ok(current);
        }

        let refreshed = self
            .index
            .refresh_since(current.generation, |diff| self.after_refresh(diff))
            .await?;
        if refreshed.joined {
            tracing::debug!(
                generation = refreshed.snapshot.generation,
                "Joined in-flight index refresh"
            );
        }
        Ok(refreshed.snapshot)
    }

    fn after_refresh(&self, diff: &SnapshotDiff) {
        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        let stale: HashSet<&str> = diff.stale().collect();
        if stale.is_empty() {
            return;
        }
        let removed = self
            .cache
            .invalidate_where(|key| stale.contains(key.plugin.as_str()));
        tracing::debug!(
            plugins = stale.len(),
            entries = removed,
            "Invalidated cache entries of changed plugins"
        );
    }

    /// Re-checks that the plugin directory still canonicalizes inside the root.
    async fn verify_location(&self, snapshot: &IndexSnapshot, plugin: &Plugin) -> Result<()> {
        let Some(root) = &snapshot.root else {
            return Err(Error::PluginNotFound {
                name: plugin.name.clone(),
            });
        };
        PathGuard::from_canonical(root.clone())
            .contain(&plugin.location)
            .await?;
        Ok(())
    }

    async fn cached_load(&self, key: CacheKey, plugin: Arc<Plugin>) -> Result<Arc<LoadedElements>> {
        let loader = Arc::clone(&self.loader);
        let filter = key.filter;
        self.cache
            .get_or_load(key, move || async move { loader.load(&plugin, filter).await })
            .await
    }
}

impl std::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginService")
            .field("root", &self.config.root)
            .field("refresh", &self.config.refresh)
            .field("index", &self.index)
            .field("cache", &self.cache)
            .finish()
    }
}
