//! Content hashing and tree fingerprints.
//!
//! Every byte that is materialized, snapshotted, or compared goes through
//! this module, so exclude semantics live here too: what is hashed is
//! exactly what is copied.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while hashing files or trees.
#[derive(Error, Debug)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Compiled exclude patterns.
///
/// A relative path is excluded when its basename matches any glob, or when
/// the path contains any pattern as a plain substring. Both checks always
/// apply; a pattern that fails to compile as a glob still participates as a
/// substring.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    globs: GlobSet,
    raw: Vec<String>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, "exclude pattern is not a valid glob: {e}");
                }
            }
        }
        let globs = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self {
            globs,
            raw: patterns.to_vec(),
        }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    /// True if `rel_path` (forward-slash separated) should be skipped.
    pub fn matches(&self, rel_path: &str) -> bool {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if self.globs.is_match(Path::new(basename)) {
            return true;
        }
        self.raw.iter().any(|p| !p.is_empty() && rel_path.contains(p))
    }
}

/// How a file on disk disagrees with its recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Modified,
    Deleted,
    Added,
}

/// A single file whose content does not match the recorded hash.
#[derive(Debug, Clone)]
pub struct FileConflict {
    pub path: String,
    pub kind: ConflictKind,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl std::fmt::Display for FileConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = |h: &Option<String>| {
            h.as_deref()
                .map(|h| h.chars().take(8).collect::<String>())
                .unwrap_or_else(|| "-".into())
        };
        match self.kind {
            ConflictKind::Modified => write!(
                f,
                "modified: {} (expected {}, actual {})",
                self.path,
                short(&self.expected),
                short(&self.actual)
            ),
            ConflictKind::Deleted => {
                write!(f, "deleted: {} (expected {})", self.path, short(&self.expected))
            }
            ConflictKind::Added => {
                write!(f, "added: {} (actual {})", self.path, short(&self.actual))
            }
        }
    }
}

/// Summary of the difference between two hash maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDiff {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MapDiff {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// SHA-256 of a byte buffer, lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex(&hasher.finalize())
}

/// SHA-256 of a file's content, lowercase hex.
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let mut file = fs::File::open(path).map_err(|source| HashError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|source| HashError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

/// Hash every file under `root`, skipping excluded paths.
///
/// Keys are paths relative to `root` with forward slashes, in sorted order.
pub fn hash_tree(root: &Path, excludes: &ExcludeSet) -> Result<BTreeMap<String, String>, HashError> {
    let mut hashes = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| HashError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_unix(root, entry.path());
        if excludes.matches(&rel) {
            continue;
        }
        hashes.insert(rel, hash_file(entry.path())?);
    }
    Ok(hashes)
}

/// Compare the files under `root` against `expected` hashes.
///
/// Returns one conflict per mismatch: a missing file is `Deleted`, a
/// changed file is `Modified`, and an unexpected (non-excluded) file is
/// `Added`.
pub fn verify_tree(
    root: &Path,
    expected: &BTreeMap<String, String>,
    excludes: &ExcludeSet,
) -> Result<Vec<FileConflict>, HashError> {
    let mut conflicts = Vec::new();
    for (rel, want) in expected {
        let full = root.join(rel);
        if !full.is_file() {
            conflicts.push(FileConflict {
                path: rel.clone(),
                kind: ConflictKind::Deleted,
                expected: Some(want.clone()),
                actual: None,
            });
            continue;
        }
        let got = hash_file(&full)?;
        if got != *want {
            conflicts.push(FileConflict {
                path: rel.clone(),
                kind: ConflictKind::Modified,
                expected: Some(want.clone()),
                actual: Some(got),
            });
        }
    }

    if root.is_dir() {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| HashError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_unix(root, entry.path());
            if excludes.matches(&rel) || expected.contains_key(&rel) {
                continue;
            }
            conflicts.push(FileConflict {
                path: rel.clone(),
                kind: ConflictKind::Added,
                expected: None,
                actual: Some(hash_file(entry.path())?),
            });
        }
    }

    Ok(conflicts)
}

/// Diff two hash maps into modified/added/removed path lists.
pub fn diff_maps(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> MapDiff {
    let mut diff = MapDiff::default();
    for (path, old_hash) in old {
        match new.get(path) {
            Some(new_hash) if new_hash != old_hash => diff.modified.push(path.clone()),
            Some(_) => {}
            None => diff.removed.push(path.clone()),
        }
    }
    for path in new.keys() {
        if !old.contains_key(path) {
            diff.added.push(path.clone());
        }
    }
    diff
}

/// Path of `path` relative to `root`, forward-slash separated.
pub fn relative_unix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn hex(digest: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    #[test]
    fn hash_bytes_is_stable() {
        assert_eq!(
            hash_bytes(b"hello\n"),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(hash_bytes(b""), hash_bytes(b""));
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, b"content\n").expect("write");
        assert_eq!(hash_file(&path).expect("hash"), hash_bytes(b"content\n"));
    }

    #[test]
    fn hash_tree_excludes_and_relativizes() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("keep.rs"), b"a").expect("write");
        fs::write(dir.path().join("sub/keep.rs"), b"b").expect("write");
        fs::write(dir.path().join("sub/skip.tmp"), b"c").expect("write");
        fs::write(dir.path().join("notes.txt"), b"d").expect("write");

        let excludes = ExcludeSet::new(&["*.tmp".into(), "notes".into()]);
        let hashes = hash_tree(dir.path(), &excludes).expect("hash tree");
        let keys: Vec<&str> = hashes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["keep.rs", "sub/keep.rs"]);
    }

    #[test]
    fn exclude_matches_basename_glob_and_substring() {
        let excludes = ExcludeSet::new(&["*.log".into(), "target".into()]);
        assert!(excludes.matches("debug.log"));
        assert!(excludes.matches("deep/dir/debug.log"));
        assert!(excludes.matches("target/out.txt"));
        assert!(excludes.matches("a/target/b.txt"));
        assert!(!excludes.matches("src/main.rs"));
    }

    #[test]
    fn verify_tree_reports_all_kinds() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("same.txt"), b"same").expect("write");
        fs::write(dir.path().join("changed.txt"), b"new").expect("write");
        fs::write(dir.path().join("extra.txt"), b"extra").expect("write");

        let mut expected = BTreeMap::new();
        expected.insert("same.txt".to_string(), hash_bytes(b"same"));
        expected.insert("changed.txt".to_string(), hash_bytes(b"old"));
        expected.insert("gone.txt".to_string(), hash_bytes(b"gone"));

        let conflicts =
            verify_tree(dir.path(), &expected, &ExcludeSet::empty()).expect("verify");
        let mut kinds: Vec<(String, ConflictKind)> = conflicts
            .into_iter()
            .map(|c| (c.path, c.kind))
            .collect();
        kinds.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            kinds,
            vec![
                ("changed.txt".to_string(), ConflictKind::Modified),
                ("extra.txt".to_string(), ConflictKind::Added),
                ("gone.txt".to_string(), ConflictKind::Deleted),
            ]
        );
    }

    #[test]
    fn diff_maps_partitions_changes() {
        let mut old = BTreeMap::new();
        old.insert("a".to_string(), "1".to_string());
        old.insert("b".to_string(), "2".to_string());
        old.insert("c".to_string(), "3".to_string());
        let mut new = BTreeMap::new();
        new.insert("a".to_string(), "1".to_string());
        new.insert("b".to_string(), "9".to_string());
        new.insert("d".to_string(), "4".to_string());

        let diff = diff_maps(&old, &new);
        assert_eq!(diff.modified, vec!["b"]);
        assert_eq!(diff.removed, vec!["c"]);
        assert_eq!(diff.added, vec!["d"]);
    }
}
