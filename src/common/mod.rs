mod directory;
mod frontmatter;

use std::path::PathBuf;

pub(crate) use directory::{
    element_stem, find_skill_file, is_markdown, modified_time, read_dir_sorted,
};
pub use frontmatter::{FrontmatterError, ParsedDocument, has_frontmatter, parse_frontmatter};

pub(crate) fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().to_path_buf())
}
