//! Path security for everything read out of the plugin repository.
//!
//! - Syntactic validation of user-supplied names (no I/O)
//! - Canonicalization with containment checks against a fixed root
//! - Symlinks are followed only when the target stays inside the root

pub mod path;

mod error;

pub use error::SecurityError;
pub use path::PathGuard;
