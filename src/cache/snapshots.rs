//! Base-content snapshot store.
//!
//! Preserves the exact bytes of the last successfully materialized version
//! of each path spec, keyed by `(source name, truncated hash of include)`.
//! These snapshots are the "base" leg of every three-way merge.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::hash;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open the store at the default root (`<cache>/base-content`).
    pub fn open_default() -> Result<Self, SnapshotError> {
        Self::at(crate::paths::base_content_dir())
    }

    /// Open the store at an explicit root. Used by tests.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| SnapshotError::Init {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot key for an include path: 16-hex truncation of SHA-256.
    ///
    /// Bounds filesystem name length while keeping collisions negligible
    /// within a per-source namespace. Fixed on-disk contract; do not vary.
    pub fn key(include: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(include.as_bytes());
        let digest = hasher.finalize();
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    fn snapshot_dir(&self, source: &str, include: &str) -> PathBuf {
        self.root.join(source).join(Self::key(include))
    }

    pub fn has(&self, source: &str, include: &str) -> bool {
        self.snapshot_dir(source, include).is_dir()
    }

    /// Replace the snapshot for `(source, include)` with `files`.
    ///
    /// The target directory is deleted and recreated, so a reader never
    /// sees a mix of old and new content alongside a fresh hash map.
    pub fn save(
        &self,
        source: &str,
        include: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), SnapshotError> {
        let dir = self.snapshot_dir(source, include);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| SnapshotError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Init {
            path: dir.clone(),
            source,
        })?;
        for (rel, content) in files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| SnapshotError::Init {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, content).map_err(|source| SnapshotError::Io { path, source })?;
        }
        Ok(())
    }

    /// All files of a snapshot, keyed by relative path. An absent snapshot
    /// yields an empty map, not an error.
    pub fn get(&self, source: &str, include: &str) -> Result<BTreeMap<String, Vec<u8>>, SnapshotError> {
        let dir = self.snapshot_dir(source, include);
        let mut files = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(files);
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| SnapshotError::Io {
                path: dir.clone(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = hash::relative_unix(&dir, entry.path());
            let content = fs::read(entry.path()).map_err(|source| SnapshotError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            files.insert(rel, content);
        }
        Ok(files)
    }

    /// A single file from a snapshot, or `None` when it is not recorded.
    pub fn get_file(
        &self,
        source: &str,
        include: &str,
        rel: &str,
    ) -> Result<Option<Vec<u8>>, SnapshotError> {
        let path = self.snapshot_dir(source, include).join(rel);
        if !path.is_file() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|source| SnapshotError::Io { path, source })
    }

    pub fn delete(&self, source: &str, include: &str) -> Result<(), SnapshotError> {
        let dir = self.snapshot_dir(source, include);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SnapshotError::Io { path: dir, source }),
        }
    }

    pub fn delete_source(&self, source: &str) -> Result<(), SnapshotError> {
        let dir = self.root.join(source);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SnapshotError::Io { path: dir, source }),
        }
    }

    /// Remove snapshots for sources no longer configured. Returns the
    /// removed source names.
    pub fn prune(&self, valid_sources: &[String]) -> Result<Vec<String>, SnapshotError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SnapshotError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::Io {
                path: self.root.clone(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !valid_sources.iter().any(|s| *s == name) {
                fs::remove_dir_all(entry.path()).map_err(|source| SnapshotError::Io {
                    path: entry.path(),
                    source,
                })?;
                removed.push(name);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> BTreeMap<String, Vec<u8>> {
        let mut files = BTreeMap::new();
        files.insert("a.txt".to_string(), b"alpha\n".to_vec());
        files.insert("sub/b.txt".to_string(), b"beta\n".to_vec());
        files
    }

    #[test]
    fn key_is_sixteen_hex_chars() {
        let key = SnapshotStore::key("src/utils");
        assert_eq!(key.len(), 16);
        assert!(key.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(key, SnapshotStore::key("src/utils"));
        assert_ne!(key, SnapshotStore::key("src/other"));
    }

    #[test]
    fn save_get_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::at(dir.path()).expect("store");
        assert!(!store.has("lib", "src/utils"));

        store.save("lib", "src/utils", &sample_files()).expect("save");
        assert!(store.has("lib", "src/utils"));
        assert_eq!(store.get("lib", "src/utils").expect("get"), sample_files());
        assert_eq!(
            store.get_file("lib", "src/utils", "sub/b.txt").expect("get file"),
            Some(b"beta\n".to_vec())
        );
        assert_eq!(store.get_file("lib", "src/utils", "missing").expect("get file"), None);
    }

    #[test]
    fn save_replaces_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::at(dir.path()).expect("store");
        store.save("lib", "src/utils", &sample_files()).expect("save");

        let mut replacement = BTreeMap::new();
        replacement.insert("only.txt".to_string(), b"only\n".to_vec());
        store.save("lib", "src/utils", &replacement).expect("save again");

        let got = store.get("lib", "src/utils").expect("get");
        assert_eq!(got, replacement, "stale files must not survive a save");
    }

    #[test]
    fn absent_snapshot_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::at(dir.path()).expect("store");
        assert!(store.get("lib", "nowhere").expect("get").is_empty());
    }

    #[test]
    fn prune_removes_unknown_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::at(dir.path()).expect("store");
        store.save("keep", "a", &sample_files()).expect("save");
        store.save("drop", "a", &sample_files()).expect("save");

        let removed = store.prune(&["keep".to_string()]).expect("prune");
        assert_eq!(removed, vec!["drop"]);
        assert!(store.has("keep", "a"));
        assert!(!store.has("drop", "a"));
    }

    #[test]
    fn delete_source_removes_all_snapshots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::at(dir.path()).expect("store");
        store.save("lib", "a", &sample_files()).expect("save");
        store.save("lib", "b", &sample_files()).expect("save");
        store.delete_source("lib").expect("delete source");
        assert!(!store.has("lib", "a"));
        assert!(!store.has("lib", "b"));
        store.delete_source("lib").expect("idempotent");
    }
}
