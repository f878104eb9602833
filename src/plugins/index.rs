//! Marketplace scanning and plugin resolution.
//!
//! A refresh walks `<root>/marketplaces/*/.claude-plugin/marketplace.json` in
//! lexicographic directory order and registers each plugin entry in
//! declaration order. The first registration of a name wins; later ones are
//! recorded as [`IndexWarning::Shadowed`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::element::ElementKind;
use super::manifest::{
    DescriptorMetadata, MarketplaceManifest, MarketplaceOwner, PluginAuthor, PluginEntry,
    PluginSource,
};
use crate::common::read_dir_sorted;
use crate::config::CatalogConfig;
use crate::security::PathGuard;
use crate::{Error, Result};

pub const MARKETPLACES_DIR: &str = "marketplaces";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marketplace {
    pub name: String,
    /// Directory name under `marketplaces/`; the tie-break key.
    pub dir_name: String,
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<MarketplaceOwner>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DescriptorMetadata>,
    /// Every plugin name the descriptor declares, including skipped ones.
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plugin {
    pub name: String,
    pub marketplace: String,
    /// Canonical plugin directory.
    pub location: PathBuf,
    pub entry: PluginEntry,
    /// Hash of the descriptor entry and location.
    pub fingerprint: u64,
}

impl Plugin {
    pub fn description(&self) -> Option<&str> {
        self.entry.effective_description()
    }

    pub fn version(&self) -> Option<&str> {
        self.entry.effective_version()
    }

    pub fn author(&self) -> Option<&PluginAuthor> {
        self.entry.author.as_ref()
    }

    /// Names of the elements the descriptor declares for `kind`.
    pub fn declared_names(&self, kind: ElementKind) -> Vec<String> {
        self.entry
            .declared(kind)
            .map(|refs| refs.iter().filter_map(|r| r.display_name()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexWarning {
    #[error("skipped marketplace descriptor {path}: {reason}")]
    Descriptor { path: PathBuf, reason: String },

    #[error("skipped plugin '{plugin}' in marketplace '{marketplace}': {reason}")]
    Plugin {
        marketplace: String,
        plugin: String,
        reason: String,
    },

    #[error("plugin '{plugin}' from marketplace '{shadowed}' is shadowed by marketplace '{winner}'")]
    Shadowed {
        plugin: String,
        winner: String,
        shadowed: String,
    },

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Immutable result of one index build.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    /// Canonical repository root; `None` when the root does not exist.
    pub root: Option<PathBuf>,
    pub marketplaces: Vec<Arc<Marketplace>>,
    /// Resolved plugins in tie-break order.
    pub plugins: Vec<Arc<Plugin>>,
    pub warnings: Vec<IndexWarning>,
    by_name: AHashMap<String, usize>,
}

impl IndexSnapshot {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            built_at: Utc::now(),
            root: None,
            marketplaces: Vec::new(),
            plugins: Vec::new(),
            warnings: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Plugin>> {
        self.by_name.get(name).map(|&i| &self.plugins[i])
    }

    pub fn marketplace(&self, name: &str) -> Option<&Arc<Marketplace>> {
        self.marketplaces.iter().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// False until the first refresh completes.
    pub fn is_built(&self) -> bool {
        self.generation > 0
    }
}

/// Plugin names that differ between two snapshots, by fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDiff {
    pub fn between(old: &IndexSnapshot, new: &IndexSnapshot) -> Self {
        let mut diff = Self::default();
        for plugin in &new.plugins {
            match old.get(&plugin.name) {
                None => diff.added.push(plugin.name.clone()),
                Some(prev) if prev.fingerprint != plugin.fingerprint => {
                    diff.changed.push(plugin.name.clone())
                }
                Some(_) => {}
            }
        }
        diff.removed = old
            .plugins
            .iter()
            .filter(|p| new.get(&p.name).is_none())
            .map(|p| p.name.clone())
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Names whose cached content can no longer be served.
    pub fn stale(&self) -> impl Iterator<Item = &str> {
        self.removed
            .iter()
            .chain(&self.changed)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Refreshed {
    pub snapshot: Arc<IndexSnapshot>,
    pub diff: SnapshotDiff,
    /// True when this caller waited on another caller's refresh.
    pub joined: bool,
}

pub struct MarketplaceIndex {
    root: PathBuf,
    max_descriptor_bytes: u64,
    io_timeout: Duration,
    current: RwLock<Arc<IndexSnapshot>>,
    gate: tokio::sync::Mutex<()>,
}

impl MarketplaceIndex {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_descriptor_bytes: config.max_descriptor_bytes,
            io_timeout: config.io_timeout,
            current: RwLock::new(Arc::new(IndexSnapshot::empty(0))),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The last built snapshot. Never blocks on a running refresh.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Looks up a plugin in the current snapshot without touching the filesystem.
    pub fn resolve_plugin(&self, name: &str) -> Result<Arc<Plugin>> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                name: name.to_string(),
            })
    }

    pub async fn refresh(&self) -> Result<Arc<IndexSnapshot>> {
        Ok(self.refresh_with_diff().await?.snapshot)
    }

    /// Rebuilds the snapshot. Callers that arrive while a rebuild runs wait
    /// for it and receive its snapshot instead of starting another.
    pub async fn refresh_with_diff(&self) -> Result<Refreshed> {
        self.refresh_since(self.snapshot().generation, |_| {}).await
    }

    /// Rebuilds unless a snapshot newer than `observed` already exists.
    ///
    /// `on_swap` receives the diff right after the new snapshot is published
    /// and before the gate is released, so callers that join this refresh
    /// only return once it has run.
    pub async fn refresh_since<F>(&self, observed: u64, on_swap: F) -> Result<Refreshed>
    where
        F: FnOnce(&SnapshotDiff),
    {
        let _gate = self.gate.lock().await;

        let previous = self.snapshot();
        if previous.generation != observed {
            return Ok(Refreshed {
                snapshot: previous,
                diff: SnapshotDiff::default(),
                joined: true,
            });
        }

        let next = Arc::new(self.build(previous.generation + 1).await?);
        let diff = SnapshotDiff::between(&previous, &next);

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        on_swap(&diff);

        tracing::info!(
            generation = next.generation,
            marketplaces = next.marketplaces.len(),
            plugins = next.plugins.len(),
            warnings = next.warnings.len(),
            changed = diff.changed.len() + diff.removed.len(),
            "Marketplace index refreshed"
        );

        Ok(Refreshed {
            snapshot: next,
            diff,
            joined: false,
        })
    }

    async fn build(&self, generation: u64) -> Result<IndexSnapshot> {
        let mut snapshot = IndexSnapshot::empty(generation);

        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(index_error(&self.root, "not a directory")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(root = %self.root.display(), "Plugin root missing, index is empty");
                return Ok(snapshot);
            }
            Err(e) => return Err(index_error(&self.root, &e.to_string())),
        }
        tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| index_error(&self.root, &e.to_string()))?;

        let guard = PathGuard::new(&self.root)
            .await
            .map_err(|e| index_error(&self.root, &e.to_string()))?;
        snapshot.root = Some(guard.root().to_path_buf());

        let marketplaces_dir = guard.root().join(MARKETPLACES_DIR);
        let dirs = match read_dir_sorted(&marketplaces_dir).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(snapshot),
            Err(e) => {
                let warning = IndexWarning::Unreadable {
                    path: marketplaces_dir,
                    reason: e.to_string(),
                };
                tracing::warn!(%warning, "Skipping marketplaces directory");
                snapshot.warnings.push(warning);
                return Ok(snapshot);
            }
        };

        for dir in dirs {
            if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                continue;
            }
            self.scan_marketplace(&guard, &dir, &mut snapshot).await;
        }

        Ok(snapshot)
    }

    async fn scan_marketplace(&self, guard: &PathGuard, dir: &Path, snapshot: &mut IndexSnapshot) {
        let Some(dir_name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return;
        };

        let market_root = match guard.contain(dir).await {
            Ok(root) => root,
            Err(e) => {
                push_warning(
                    snapshot,
                    IndexWarning::Descriptor {
                        path: dir.to_path_buf(),
                        reason: e.to_string(),
                    },
                );
                return;
            }
        };

        let descriptor = MarketplaceManifest::descriptor_path(&market_root);
        if tokio::fs::metadata(&descriptor).await.is_err() {
            tracing::debug!(dir = %dir.display(), "No marketplace descriptor, skipping");
            return;
        }

        let manifest = match tokio::time::timeout(
            self.io_timeout,
            MarketplaceManifest::load(&descriptor, self.max_descriptor_bytes),
        )
        .await
        {
            Ok(Ok(manifest)) => manifest,
            Ok(Err(e)) => {
                push_warning(
                    snapshot,
                    IndexWarning::Descriptor {
                        path: descriptor,
                        reason: e.to_string(),
                    },
                );
                return;
            }
            Err(_) => {
                push_warning(
                    snapshot,
                    IndexWarning::Descriptor {
                        path: descriptor,
                        reason: format!("timed out after {:?}", self.io_timeout),
                    },
                );
                return;
            }
        };

        let name = manifest
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| dir_name.clone());
        let market_guard = PathGuard::from_canonical(market_root.clone());
        let mut declared = Vec::with_capacity(manifest.plugins.len());

        for raw in &manifest.plugins {
            let plugin_name = raw
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("<unnamed>")
                .to_string();
            declared.push(plugin_name.clone());

            match resolve_entry(&market_guard, raw).await {
                Ok((entry, location)) => {
                    let plugin = Plugin {
                        fingerprint: fingerprint(raw, &location),
                        name: entry.name.clone(),
                        marketplace: name.clone(),
                        location,
                        entry,
                    };
                    register(snapshot, plugin);
                }
                Err(reason) => push_warning(
                    snapshot,
                    IndexWarning::Plugin {
                        marketplace: name.clone(),
                        plugin: plugin_name,
                        reason,
                    },
                ),
            }
        }

        snapshot.marketplaces.push(Arc::new(Marketplace {
            name,
            dir_name,
            root: market_root,
            owner: manifest.owner,
            metadata: manifest.metadata,
            plugins: declared,
        }));
    }
}

impl std::fmt::Debug for MarketplaceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("MarketplaceIndex")
            .field("root", &self.root)
            .field("generation", &snapshot.generation)
            .field("plugins", &snapshot.plugins.len())
            .finish()
    }
}

/// Parses one raw plugin entry and resolves its local source directory.
async fn resolve_entry(
    guard: &PathGuard,
    raw: &serde_json::Value,
) -> std::result::Result<(PluginEntry, PathBuf), String> {
    let entry: PluginEntry =
        serde_json::from_value(raw.clone()).map_err(|e| format!("malformed entry: {e}"))?;

    PathGuard::validate_segment(&entry.name).map_err(|e| e.to_string())?;

    let source = match &entry.source {
        Some(PluginSource::Path(path)) => path,
        Some(PluginSource::Remote { source, .. }) => {
            return Err(format!("remote source '{source}' is not installed locally"));
        }
        None => return Err("missing source".to_string()),
    };

    let location = guard
        .resolve_relative(Path::new(source))
        .await
        .map_err(|e| e.to_string())?;
    if !tokio::fs::metadata(&location)
        .await
        .is_ok_and(|m| m.is_dir())
    {
        return Err(format!("source '{source}' is not a directory"));
    }

    Ok((entry, location))
}

fn register(snapshot: &mut IndexSnapshot, plugin: Plugin) {
    if let Some(&existing) = snapshot.by_name.get(&plugin.name) {
        let winner = snapshot.plugins[existing].marketplace.clone();
        push_warning(
            snapshot,
            IndexWarning::Shadowed {
                plugin: plugin.name,
                winner,
                shadowed: plugin.marketplace,
            },
        );
        return;
    }

    snapshot
        .by_name
        .insert(plugin.name.clone(), snapshot.plugins.len());
    snapshot.plugins.push(Arc::new(plugin));
}

fn push_warning(snapshot: &mut IndexSnapshot, warning: IndexWarning) {
    tracing::warn!(%warning, "Marketplace index warning");
    snapshot.warnings.push(warning);
}

fn fingerprint(raw: &serde_json::Value, location: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.to_string().hash(&mut hasher);
    location.hash(&mut hasher);
    hasher.finish()
}

fn index_error(path: &Path, reason: &str) -> Error {
    Error::Index {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_marketplace(root: &Path, dir: &str, descriptor: &str, plugins: &[&str]) -> PathBuf {
        let market = root.join(MARKETPLACES_DIR).join(dir);
        std::fs::create_dir_all(market.join(".claude-plugin")).unwrap();
        std::fs::write(market.join(".claude-plugin/marketplace.json"), descriptor).unwrap();
        for plugin in plugins {
            std::fs::create_dir_all(market.join("plugins").join(plugin)).unwrap();
        }
        market
    }

    fn index_for(root: &Path) -> MarketplaceIndex {
        MarketplaceIndex::new(&CatalogConfig::new(root))
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let index = index_for(&dir.path().join("absent"));

        let snapshot = index.refresh().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.is_built());
        assert!(snapshot.root.is_none());
    }

    #[tokio::test]
    async fn test_missing_marketplaces_dir_is_empty() {
        let dir = tempdir().unwrap();
        let snapshot = index_for(dir.path()).refresh().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_root_not_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plugins");
        std::fs::write(&file, "x").unwrap();

        let err = index_for(&file).refresh().await.unwrap_err();
        assert!(matches!(err, Error::Index { .. }));
    }

    #[tokio::test]
    async fn test_scan_resolves_plugins() {
        let dir = tempdir().unwrap();
        write_marketplace(
            dir.path(),
            "acme",
            r#"{"name": "acme-market", "owner": {"name": "Acme"}, "plugins": [
                {"name": "fmt", "source": "./plugins/fmt", "description": "Formatter"},
                {"name": "lint", "source": "./plugins/lint"}
            ]}"#,
            &["fmt", "lint"],
        );

        let index = index_for(dir.path());
        let snapshot = index.refresh().await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.marketplaces[0].name, "acme-market");
        assert_eq!(snapshot.marketplaces[0].dir_name, "acme");

        let fmt = index.resolve_plugin("fmt").unwrap();
        assert_eq!(fmt.marketplace, "acme-market");
        assert_eq!(fmt.description(), Some("Formatter"));
        assert!(fmt.location.starts_with(snapshot.root.as_ref().unwrap()));

        let err = index.resolve_plugin("nope").unwrap_err();
        assert!(matches!(err, Error::PluginNotFound { ref name } if name == "nope"));
    }

    #[tokio::test]
    async fn test_tie_break_first_directory_wins() {
        let dir = tempdir().unwrap();
        let entry = r#"{"plugins": [{"name": "foo", "source": "./plugins/foo"}]}"#;
        write_marketplace(dir.path(), "beta", entry, &["foo"]);
        write_marketplace(dir.path(), "alpha", entry, &["foo"]);

        let snapshot = index_for(dir.path()).refresh().await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("foo").unwrap().marketplace, "alpha");
        assert_eq!(
            snapshot.warnings,
            vec![IndexWarning::Shadowed {
                plugin: "foo".into(),
                winner: "alpha".into(),
                shadowed: "beta".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_bad_entries_become_warnings() {
        let dir = tempdir().unwrap();
        write_marketplace(
            dir.path(),
            "m",
            r#"{"plugins": [
                {"name": "remote", "source": {"source": "github", "repo": "a/b"}},
                {"name": "escape", "source": "../../.."},
                {"name": "../evil", "source": "./plugins/ok"},
                {"name": "nosource"},
                {"name": "missing", "source": "./plugins/missing"},
                {"name": "ok", "source": "./plugins/ok"}
            ]}"#,
            &["ok"],
        );
        write_marketplace(dir.path(), "broken", "{ not json", &[]);
        std::fs::create_dir_all(dir.path().join(MARKETPLACES_DIR).join("no-descriptor")).unwrap();

        let snapshot = index_for(dir.path()).refresh().await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("ok").is_some());
        assert_eq!(snapshot.marketplaces.len(), 1);
        assert_eq!(snapshot.marketplaces[0].plugins.len(), 6);

        let descriptor_warnings = snapshot
            .warnings
            .iter()
            .filter(|w| matches!(w, IndexWarning::Descriptor { .. }))
            .count();
        let plugin_warnings = snapshot
            .warnings
            .iter()
            .filter(|w| matches!(w, IndexWarning::Plugin { .. }))
            .count();
        assert_eq!(descriptor_warnings, 1);
        assert_eq!(plugin_warnings, 5);
    }

    #[tokio::test]
    async fn test_oversized_descriptor_skipped() {
        let dir = tempdir().unwrap();
        write_marketplace(
            dir.path(),
            "m",
            r#"{"plugins": [{"name": "p", "source": "./plugins/p"}]}"#,
            &["p"],
        );

        let index = MarketplaceIndex::new(&CatalogConfig::new(dir.path()).with_max_descriptor_bytes(8));
        let snapshot = index.refresh().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(matches!(
            snapshot.warnings[0],
            IndexWarning::Descriptor { ref reason, .. } if reason.contains("limit")
        ));
    }

    #[tokio::test]
    async fn test_refresh_diff() {
        let dir = tempdir().unwrap();
        let descriptor = |desc: &str| {
            format!(
                r#"{{"plugins": [
                    {{"name": "a", "source": "./plugins/a", "description": "{desc}"}},
                    {{"name": "b", "source": "./plugins/b"}}
                ]}}"#
            )
        };
        let market = write_marketplace(dir.path(), "m", &descriptor("v1"), &["a", "b"]);

        let index = index_for(dir.path());
        let first = index.refresh_with_diff().await.unwrap();
        assert_eq!(first.diff.added, vec!["a", "b"]);
        assert_eq!(first.snapshot.generation, 1);

        let unchanged = index.refresh_with_diff().await.unwrap();
        assert!(unchanged.diff.is_empty());

        std::fs::write(
            market.join(".claude-plugin/marketplace.json"),
            r#"{"plugins": [{"name": "a", "source": "./plugins/a", "description": "v2"}]}"#,
        )
        .unwrap();
        let changed = index.refresh_with_diff().await.unwrap();
        assert_eq!(changed.diff.changed, vec!["a"]);
        assert_eq!(changed.diff.removed, vec!["b"]);
        assert_eq!(changed.diff.stale().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(changed.snapshot.generation, 3);
        assert!(index.resolve_plugin("b").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_source_outside_root_rejected() {
        let outside = tempdir().unwrap();
        let dir = tempdir().unwrap();
        let market = write_marketplace(
            dir.path(),
            "m",
            r#"{"plugins": [{"name": "sneaky", "source": "./plugins/sneaky"}]}"#,
            &[],
        );
        std::fs::create_dir_all(market.join("plugins")).unwrap();
        std::os::unix::fs::symlink(outside.path(), market.join("plugins/sneaky")).unwrap();

        let snapshot = index_for(dir.path()).refresh().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(matches!(
            snapshot.warnings[0],
            IndexWarning::Plugin { ref plugin, .. } if plugin == "sneaky"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_builds_run_once() {
        let dir = tempdir().unwrap();
        write_marketplace(
            dir.path(),
            "m",
            r#"{"plugins": [{"name": "p", "source": "./plugins/p"}]}"#,
            &["p"],
        );
        let index = Arc::new(index_for(dir.path()));
        let swaps = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                let swaps = Arc::clone(&swaps);
                tokio::spawn(async move {
                    index
                        .refresh_since(0, |diff| {
                            assert_eq!(diff.added, vec!["p"]);
                            swaps.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut built = 0;
        for handle in handles {
            let refreshed = handle.await.unwrap();
            assert_eq!(refreshed.snapshot.generation, 1);
            if refreshed.joined {
                assert!(refreshed.diff.is_empty());
            } else {
                built += 1;
            }
        }

        assert_eq!(built, 1);
        assert_eq!(swaps.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(index.snapshot().generation, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_collapses() {
        let dir = tempdir().unwrap();
        write_marketplace(
            dir.path(),
            "m",
            r#"{"plugins": [{"name": "p", "source": "./plugins/p"}]}"#,
            &["p"],
        );
        let index = Arc::new(index_for(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                tokio::spawn(async move { index.refresh_with_diff().await.unwrap() })
            })
            .collect();

        let mut generations = Vec::new();
        for handle in handles {
            let refreshed = handle.await.unwrap();
            assert!(refreshed.snapshot.get("p").is_some());
            generations.push(refreshed.snapshot.generation);
        }

        let latest = index.snapshot().generation;
        assert!(latest <= 8);
        assert!(generations.iter().all(|&g| g >= 1 && g <= latest));
    }
}
