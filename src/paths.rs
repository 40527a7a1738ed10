//! XDG directory helpers for the shared cache root.

use std::path::PathBuf;

/// Base directory for persistent caches (clones, base-content snapshots).
///
/// Uses `CHERRY_CACHE_DIR` if set, otherwise `$XDG_CACHE_HOME/cherry-go` or
/// `~/.cache/cherry-go`.
pub(crate) fn cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("CHERRY_CACHE_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CACHE_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".cache")
        })
        .join("cherry-go")
}

/// Root directory for cached repository clones.
pub(crate) fn repos_dir() -> PathBuf {
    cache_root().join("repos")
}

/// Root directory for base-content snapshots.
pub(crate) fn base_content_dir() -> PathBuf {
    cache_root().join("base-content")
}
