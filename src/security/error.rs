//! Security error types.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("path escapes root: {0}")]
    PathEscape(PathBuf),

    #[error("absolute path not allowed: {0}")]
    AbsolutePath(PathBuf),

    #[error("cannot resolve {path}: {message}")]
    Io {
        path: PathBuf,
        kind: ErrorKind,
        message: String,
    },
}

impl SecurityError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Io {
                kind: ErrorKind::NotFound,
                ..
            }
        )
    }

    pub fn is_escape(&self) -> bool {
        matches!(self, Self::PathEscape(_) | Self::AbsolutePath(_))
    }
}
