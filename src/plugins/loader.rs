//! Reads and classifies the element files of a resolved plugin.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncReadExt;

use super::element::{
    ContentStamp, Element, ElementFailure, ElementKind, ElementPayload, ElementRecord,
    LoadedElements,
};
use super::index::Plugin;
use super::manifest::ElementRef;
use crate::common::{
    element_stem, find_skill_file, has_frontmatter, is_markdown, parse_frontmatter,
    read_dir_sorted,
};
use crate::config::CatalogConfig;
use crate::security::PathGuard;
use crate::{Error, Result};

#[derive(Debug, Default, Deserialize)]
struct ElementFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// A file the loader will attempt, or the reason it cannot.
struct Candidate {
    name: String,
    path: PathBuf,
    resolved: std::result::Result<PathBuf, String>,
}

#[derive(Debug, Clone)]
pub struct ElementLoader {
    max_element_bytes: u64,
    io_timeout: Duration,
}

impl ElementLoader {
    pub fn new(max_element_bytes: u64, io_timeout: Duration) -> Self {
        Self {
            max_element_bytes,
            io_timeout,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(config.max_element_bytes, config.io_timeout)
    }

    /// Loads every element of `plugin`, or only those of `filter`.
    ///
    /// Per-element problems become [`ElementRecord::Failed`]; only a plugin
    /// directory that cannot be listed fails the whole load.
    pub async fn load(&self, plugin: &Plugin, filter: Option<ElementKind>) -> Result<LoadedElements> {
        tokio::fs::read_dir(&plugin.location)
            .await
            .map_err(|e| Error::Load {
                path: plugin.location.clone(),
                reason: e.to_string(),
            })?;

        let guard = PathGuard::from_canonical(plugin.location.clone());
        let mut stamp = ContentStamp::default();
        let mut records = Vec::new();

        for kind in ElementKind::ALL {
            if filter.is_some_and(|f| f != kind) {
                continue;
            }

            let mut candidates = match plugin.entry.declared(kind) {
                Some(refs) => declared_candidates(&guard, kind, refs).await,
                None => scan_candidates(&guard, kind, &mut stamp).await,
            };
            candidates.sort_by(|a, b| a.name.cmp(&b.name));

            for candidate in candidates {
                let record = match candidate.resolved {
                    Ok(file) => {
                        stamp.record(&file).await;
                        self.load_file(kind, candidate.name, file).await
                    }
                    Err(reason) => {
                        stamp.record(&candidate.path).await;
                        ElementRecord::Failed(ElementFailure {
                            kind,
                            name: candidate.name,
                            path: candidate.path,
                            reason,
                        })
                    }
                };

                if let ElementRecord::Failed(failure) = &record {
                    tracing::warn!(
                        plugin = %plugin.name,
                        kind = %kind,
                        path = %failure.path.display(),
                        reason = %failure.reason,
                        "Element failed to load"
                    );
                }
                records.push(record);
            }
        }

        let loaded = records.iter().filter(|r| r.is_loaded()).count();
        tracing::info!(
            plugin = %plugin.name,
            loaded,
            failed = records.len() - loaded,
            "Plugin elements loaded"
        );

        Ok(LoadedElements {
            plugin: plugin.name.clone(),
            marketplace: plugin.marketplace.clone(),
            records,
            stamp,
        })
    }

    async fn load_file(&self, kind: ElementKind, name: String, path: PathBuf) -> ElementRecord {
        let content = match tokio::time::timeout(self.io_timeout, self.read_bounded(&path)).await {
            Ok(Ok(content)) => content,
            Ok(Err(reason)) => return failed(kind, name, path, reason),
            Err(_) => {
                let reason = format!("read timed out after {:?}", self.io_timeout);
                return failed(kind, name, path, reason);
            }
        };

        let payload = if has_frontmatter(&content) {
            match parse_frontmatter::<ElementFrontmatter>(&content) {
                Ok(doc) => Some(ElementPayload {
                    name: doc.frontmatter.name,
                    description: doc.frontmatter.description,
                    extra: doc.frontmatter.extra,
                    body: doc.body,
                }),
                Err(e) => return failed(kind, name, path, e.to_string()),
            }
        } else {
            None
        };

        ElementRecord::Loaded(Element {
            kind,
            name,
            path,
            content,
            payload,
        })
    }

    /// Reads a UTF-8 file of at most `max_element_bytes`.
    async fn read_bounded(&self, path: &Path) -> std::result::Result<String, String> {
        let limit = self.max_element_bytes;
        let too_large = |size: u64| format!("{size} bytes exceeds the {limit} byte limit");

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| e.to_string())?;
        let size = file.metadata().await.map_err(|e| e.to_string())?.len();
        if size > limit {
            return Err(too_large(size));
        }

        let mut buf = Vec::with_capacity(size as usize);
        file.take(limit.saturating_add(1))
            .read_to_end(&mut buf)
            .await
            .map_err(|e| e.to_string())?;
        if buf.len() as u64 > limit {
            return Err(too_large(buf.len() as u64));
        }

        String::from_utf8(buf).map_err(|_| "content is not valid UTF-8".to_string())
    }
}

fn failed(kind: ElementKind, name: String, path: PathBuf, reason: String) -> ElementRecord {
    ElementRecord::Failed(ElementFailure {
        kind,
        name,
        path,
        reason,
    })
}

/// Enumerates the conventional `skills/`, `agents/` or `commands/` directory.
async fn scan_candidates(
    guard: &PathGuard,
    kind: ElementKind,
    stamp: &mut ContentStamp,
) -> Vec<Candidate> {
    let dir = guard.root().join(kind.dir_name());
    stamp.record(&dir).await;
    let entries = match read_dir_sorted(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            return vec![Candidate {
                name: kind.dir_name().to_string(),
                path: dir,
                resolved: Err(format!("cannot list directory: {e}")),
            }];
        }
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let Ok(meta) = tokio::fs::metadata(&entry).await else {
            continue;
        };

        let (name, file) = if meta.is_dir() {
            if kind != ElementKind::Skill {
                continue;
            }
            let Some(skill_file) = find_skill_file(&entry).await else {
                tracing::debug!(path = %entry.display(), "Skipping directory without SKILL.md");
                continue;
            };
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            (name.to_string(), skill_file)
        } else if is_markdown(&entry) {
            let Some(name) = element_stem(&entry) else {
                continue;
            };
            (name, entry)
        } else {
            continue;
        };

        let resolved = guard.contain(&file).await.map_err(|e| e.to_string());
        candidates.push(Candidate {
            name,
            path: file,
            resolved,
        });
    }
    candidates
}

/// Resolves element paths declared in the descriptor entry.
async fn declared_candidates(
    guard: &PathGuard,
    kind: ElementKind,
    refs: &[ElementRef],
) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(refs.len());

    for element in refs {
        let relative = match element.relative_path() {
            Some(path) => PathBuf::from(path),
            None => Path::new(kind.dir_name()).join(element.display_name().unwrap_or_default()),
        };
        let name = element
            .display_name()
            .unwrap_or_else(|| relative.display().to_string());

        let resolved = resolve_declared(guard, kind, &relative).await;
        candidates.push(Candidate {
            name,
            path: guard.root().join(&relative),
            resolved,
        });
    }
    candidates
}

async fn resolve_declared(
    guard: &PathGuard,
    kind: ElementKind,
    relative: &Path,
) -> std::result::Result<PathBuf, String> {
    let target = match guard.resolve_relative(relative).await {
        Ok(target) => target,
        // `skills/foo` may name `skills/foo.md`.
        Err(e) if e.is_not_found() && relative.extension().is_none() => guard
            .resolve_relative(&relative.with_extension("md"))
            .await
            .map_err(|_| e.to_string())?,
        Err(e) => return Err(e.to_string()),
    };

    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|e| e.to_string())?;
    if !meta.is_dir() {
        return Ok(target);
    }
    if kind != ElementKind::Skill {
        return Err("declared path is a directory".to_string());
    }

    let skill_file = find_skill_file(&target)
        .await
        .ok_or_else(|| "skill directory has no SKILL.md".to_string())?;
    guard.contain(&skill_file).await.map_err(|e| e.to_string())
}
