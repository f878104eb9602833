//! Marketplace-based plugin discovery and element loading.
//!
//! Each marketplace directory carries a `.claude-plugin/marketplace.json`
//! descriptor listing its plugins; each plugin directory may contain:
//! - `skills/`: `<name>/SKILL.md` directories or `<name>.md` files
//! - `agents/`: `<name>.md` files
//! - `commands/`: `<name>.md` files
//!
//! A descriptor entry may instead declare explicit element paths per kind.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.claude/plugins/
//! └── marketplaces/
//!     └── acme/
//!         ├── .claude-plugin/
//!         │   └── marketplace.json
//!         └── plugins/
//!             └── formatter/
//!                 ├── skills/
//!                 │   └── style/
//!                 │       └── SKILL.md
//!                 ├── agents/
//!                 │   └── reviewer.md
//!                 └── commands/
//!                     └── fmt.md
//! ```

mod element;
mod index;
mod loader;
mod manifest;
mod service;

pub use element::{
    ContentStamp, Element, ElementFailure, ElementKind, ElementPayload, ElementRecord,
    ElementSelector, LoadedElements, ParseElementKindError,
};
pub use index::{
    IndexSnapshot, IndexWarning, MARKETPLACES_DIR, Marketplace, MarketplaceIndex, Plugin,
    Refreshed, SnapshotDiff,
};
pub use loader::ElementLoader;
pub use manifest::{
    DescriptorMetadata, ElementRef, ManifestError, MarketplaceManifest, MarketplaceOwner,
    PluginAuthor, PluginEntry, PluginSource,
};
pub use service::{CacheKey, IndexReport, PluginDetail, PluginService, PluginSummary};
