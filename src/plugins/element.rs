//! Element records produced by the loader.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::common::modified_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[serde(alias = "skills")]
    Skill,
    #[serde(alias = "agents")]
    Agent,
    #[serde(alias = "commands")]
    Command,
}

impl ElementKind {
    /// Load order.
    pub const ALL: [ElementKind; 3] = [Self::Skill, Self::Agent, Self::Command];

    /// Conventional subdirectory inside a plugin.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Agent => "agents",
            Self::Command => "commands",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Command => "command",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown element kind '{0}', expected skill, agent or command")]
pub struct ParseElementKindError(pub String);

impl FromStr for ElementKind {
    type Err = ParseElementKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skill" | "skills" => Ok(Self::Skill),
            "agent" | "agents" => Ok(Self::Agent),
            "command" | "commands" => Ok(Self::Command),
            _ => Err(ParseElementKindError(s.to_string())),
        }
    }
}

/// Names one element of a plugin. Accepts `type` as an alias of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementSelector {
    #[serde(alias = "type")]
    pub kind: ElementKind,
    pub name: String,
}

impl ElementSelector {
    pub fn new(kind: ElementKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Frontmatter keys of an element plus its markdown body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub kind: ElementKind,
    pub name: String,
    pub path: PathBuf,
    pub content: String,
    /// Present when the file carries a frontmatter block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ElementPayload>,
}

impl Element {
    pub fn description(&self) -> Option<&str> {
        self.payload.as_ref()?.description.as_deref()
    }
}

/// An element that could not be loaded. Never carries file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFailure {
    pub kind: ElementKind,
    pub name: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ElementRecord {
    Loaded(Element),
    Failed(ElementFailure),
}

impl ElementRecord {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Loaded(e) => e.kind,
            Self::Failed(f) => f.kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Loaded(e) => &e.name,
            Self::Failed(f) => &f.name,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Modification times observed while loading, for change detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStamp {
    entries: Vec<(PathBuf, Option<SystemTime>)>,
}

impl ContentStamp {
    pub async fn record(&mut self, path: &Path) {
        let modified = modified_time(path).await;
        self.entries.push((path.to_path_buf(), modified));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every recorded path still has the same modification time.
    pub async fn is_current(&self) -> bool {
        for (path, recorded) in &self.entries {
            if modified_time(path).await != *recorded {
                tracing::debug!(path = %path.display(), "content stamp changed");
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedElements {
    pub plugin: String,
    pub marketplace: String,
    pub records: Vec<ElementRecord>,
    #[serde(skip)]
    pub stamp: ContentStamp,
}

impl LoadedElements {
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.records.iter().filter_map(|r| match r {
            ElementRecord::Loaded(e) => Some(e),
            ElementRecord::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ElementFailure> {
        self.records.iter().filter_map(|r| match r {
            ElementRecord::Failed(f) => Some(f),
            ElementRecord::Loaded(_) => None,
        })
    }

    pub fn find(&self, kind: ElementKind, name: &str) -> Option<&ElementRecord> {
        self.records
            .iter()
            .find(|r| r.kind() == kind && r.name() == name)
    }
}
