//! Root-anchored path handling with symlink protection.

mod guard;

pub use guard::PathGuard;

use std::path::{Component, Path, PathBuf};

/// Longest accepted user-supplied name, in characters.
pub const MAX_NAME_LEN: usize = 256;

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !components.is_empty()
                    && !matches!(
                        components.last(),
                        Some(Component::RootDir) | Some(Component::Prefix(_))
                    )
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        PathBuf::from(".")
    } else {
        components.iter().collect()
    }
}
