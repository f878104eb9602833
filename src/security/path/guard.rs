//! Containment checks against a canonical root directory.

use std::path::{Component, Path, PathBuf};

use super::{MAX_NAME_LEN, normalize_path};
use crate::security::SecurityError;

/// Validates names and paths so that every resolved location stays under `root`.
///
/// The root is canonicalized once; every resolution canonicalizes the candidate
/// (following symlinks) and rejects results outside the root instead of
/// following them further.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, SecurityError> {
        let root = canonicalize(root.as_ref()).await?;
        Ok(Self { root })
    }

    /// Builds a guard from a path that is already canonical.
    pub(crate) fn from_canonical(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Syntactic validation of a single user-supplied name. Performs no I/O.
    pub fn validate_segment(segment: &str) -> Result<(), SecurityError> {
        if segment.is_empty() {
            return Err(invalid(segment, "must not be empty"));
        }
        if segment.chars().count() > MAX_NAME_LEN {
            return Err(invalid(
                segment,
                &format!("must not exceed {MAX_NAME_LEN} characters"),
            ));
        }
        if segment.chars().any(char::is_control) {
            return Err(invalid(segment, "must not contain control characters"));
        }
        if segment.starts_with(['/', '\\'])
            || Path::new(segment).is_absolute()
            || has_drive_prefix(segment)
        {
            return Err(invalid(segment, "must not be an absolute path"));
        }
        if segment.contains("..") {
            return Err(invalid(segment, "must not contain '..'"));
        }
        if segment.contains(['/', '\\']) {
            return Err(invalid(segment, "must not contain path separators"));
        }
        if segment.starts_with('.') {
            return Err(invalid(segment, "must not start with '.'"));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(invalid(
                segment,
                &format!("contains disallowed character {c:?}"),
            ));
        }
        Ok(())
    }

    /// Validates `segment`, then resolves `root/segment` to a canonical path inside the root.
    pub async fn resolve(&self, segment: &str) -> Result<PathBuf, SecurityError> {
        Self::validate_segment(segment)?;
        self.contain(&self.root.join(segment)).await
    }

    /// Resolves a relative, possibly multi-component path such as `./plugins/foo`.
    pub async fn resolve_relative(&self, relative: &Path) -> Result<PathBuf, SecurityError> {
        if relative
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
        {
            return Err(SecurityError::AbsolutePath(relative.to_path_buf()));
        }

        let lexical = normalize_path(&self.root.join(relative));
        if !lexical.starts_with(&self.root) {
            return Err(SecurityError::PathEscape(relative.to_path_buf()));
        }

        self.contain(&lexical).await
    }

    /// Canonicalizes an existing path and checks that it stays inside the root.
    pub async fn contain(&self, path: &Path) -> Result<PathBuf, SecurityError> {
        let canonical = canonicalize(path).await?;
        if !canonical.starts_with(&self.root) {
            tracing::warn!(
                root = %self.root.display(),
                path = %path.display(),
                "Rejected path resolving outside root"
            );
            return Err(SecurityError::PathEscape(canonical));
        }
        Ok(canonical)
    }
}

fn invalid(segment: &str, reason: &str) -> SecurityError {
    SecurityError::InvalidName {
        name: segment.to_string(),
        reason: reason.to_string(),
    }
}

fn has_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

async fn canonicalize(path: &Path) -> Result<PathBuf, SecurityError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| SecurityError::io(path, &e))
}
