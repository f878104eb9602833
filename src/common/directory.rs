use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SKILL_FILE: &str = "SKILL.md";

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

pub fn is_skill_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(SKILL_FILE))
}

/// Element name for a file or directory: the file stem, with a trailing
/// `.skill` removed (`commit.skill.md` → `commit`).
pub fn element_stem(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let stem = stem.strip_suffix(".skill").unwrap_or(stem);
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Directory entries sorted by file name, so scans never depend on
/// filesystem iteration order.
pub async fn read_dir_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Finds `SKILL.md` (any case) directly inside `dir`.
pub async fn find_skill_file(dir: &Path) -> Option<PathBuf> {
    read_dir_sorted(dir)
        .await
        .ok()?
        .into_iter()
        .find(|p| is_skill_file(p))
}

pub async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
}
