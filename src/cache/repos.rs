//! The repository cache: one full clone per remote URL under a shared
//! root, reused across projects and runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use git2::{Oid, Repository};
use thiserror::Error;
use walkdir::WalkDir;

use super::auth;
use crate::config::AuthConfig;
use crate::hash;

/// Branch names probed, in order, when a path spec names no reference.
const DEFAULT_BRANCHES: [&str; 4] = ["main", "master", "develop", "dev"];

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to open cached repository {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to checkout '{reference}': not a valid branch, tag, or commit")]
    Reference { reference: String },

    #[error("failed to checkout '{reference}': {source}")]
    Checkout {
        reference: String,
        #[source]
        source: git2::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// A cached clone listed by `RepoCache::list`.
#[derive(Debug, Clone)]
pub struct CachedRepoInfo {
    pub name: String,
    pub path: PathBuf,
    pub last_modified: SystemTime,
}

/// Manager for the shared clone root. One instance is shared by every
/// source of a run so that checkouts of the same clone serialize.
pub struct RepoCache {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RepoCache {
    /// Open the cache at the default root (`<cache>/repos`).
    pub fn open_default() -> Result<Self, CacheError> {
        Self::at(crate::paths::repos_dir())
    }

    /// Open the cache at an explicit root. Used by tests.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CacheError::Init {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a clone of `url` lives in: `<sanitized-name>-<8-hex>`.
    pub fn repo_dir(&self, url: &str) -> PathBuf {
        self.root.join(cache_dir_name(url))
    }

    /// Open the cached clone for `url`, cloning it first if needed.
    ///
    /// Idempotent: a complete clone (`.git` marker present) is opened in
    /// place; a half-initialized directory is removed and re-cloned. A
    /// failed clone never leaves a partial directory behind.
    pub fn open_or_clone(&self, url: &str, auth: &AuthConfig) -> Result<CachedRepo, CacheError> {
        let path = self.repo_dir(url);
        let lock = self.lock_for(&path);
        let repo = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if path.join(".git").is_dir() {
                tracing::debug!(path = %path.display(), "using cached repository");
                Repository::open(&path).map_err(|source| CacheError::Open {
                    path: path.clone(),
                    source,
                })?
            } else {
                if path.exists() {
                    fs::remove_dir_all(&path).map_err(|source| CacheError::Io {
                        path: path.clone(),
                        source,
                    })?;
                }
                tracing::info!(url, path = %path.display(), "cloning repository into cache");
                match clone_all_refs(url, auth, &path) {
                    Ok(repo) => repo,
                    Err(source) => {
                        let _ = fs::remove_dir_all(&path);
                        return Err(CacheError::Clone {
                            url: url.to_string(),
                            source,
                        });
                    }
                }
            }
        };
        Ok(CachedRepo {
            repo,
            path,
            url: url.to_string(),
            auth: auth.clone(),
            checkout_lock: lock,
        })
    }

    /// Enumerate cached clones (directories carrying a `.git` marker).
    pub fn list(&self) -> Result<Vec<CachedRepoInfo>, CacheError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut repos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.join(".git").is_dir() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            repos.push(CachedRepoInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                last_modified: modified,
            });
        }
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    /// Remove clones not touched within `days`. Returns the removed names.
    pub fn clean_older_than(&self, days: u64) -> Result<Vec<String>, CacheError> {
        let max_age = Duration::from_secs(days.saturating_mul(24 * 60 * 60));
        let now = SystemTime::now();
        let mut removed = Vec::new();
        for info in self.list()? {
            let age = now
                .duration_since(info.last_modified)
                .unwrap_or(Duration::ZERO);
            if age > max_age {
                fs::remove_dir_all(&info.path).map_err(|source| CacheError::Io {
                    path: info.path.clone(),
                    source,
                })?;
                removed.push(info.name);
            }
        }
        Ok(removed)
    }

    /// Total size of the cache root in bytes.
    pub fn size_bytes(&self) -> Result<u64, CacheError> {
        let mut size = 0u64;
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.root.clone(),
                source: source
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            })?;
            if entry.file_type().is_file() {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(size)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

fn clone_all_refs(url: &str, auth: &AuthConfig, path: &Path) -> Result<Repository, git2::Error> {
    let mut fetch = git2::FetchOptions::new();
    fetch.remote_callbacks(auth::remote_callbacks(auth));
    fetch.download_tags(git2::AutotagOption::All);
    // No single-branch narrowing: any branch or tag may be checked out later.
    git2::build::RepoBuilder::new()
        .fetch_options(fetch)
        .clone(url, path)
}

/// A handle to one cached clone, checked out at whatever reference the
/// current path spec needs. The worktree is read-only to callers.
pub struct CachedRepo {
    repo: Repository,
    path: PathBuf,
    url: String,
    auth: AuthConfig,
    checkout_lock: Arc<Mutex<()>>,
}

impl CachedRepo {
    /// Filesystem path of the clone's working copy.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fast-forward fetch of all branches and tags; an already-up-to-date
    /// remote is not an error.
    pub fn pull(&self) -> Result<(), CacheError> {
        let _guard = self
            .checkout_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut remote = self.repo.find_remote("origin")?;
        let mut options = git2::FetchOptions::new();
        options.remote_callbacks(auth::remote_callbacks(&self.auth));
        options.download_tags(git2::AutotagOption::All);
        remote
            .fetch(
                &["+refs/heads/*:refs/remotes/origin/*"],
                Some(&mut options),
                None,
            )
            .map_err(|source| CacheError::Fetch {
                url: self.url.clone(),
                source,
            })
    }

    /// Check out `reference`, trying branch, then tag, then commit hash.
    ///
    /// Detaches HEAD at the resolved commit and force-syncs the worktree;
    /// returns the commit id. Serialized against other checkouts of the
    /// same clone in this process.
    pub fn checkout(&self, reference: &str) -> Result<String, CacheError> {
        let _guard = self
            .checkout_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let oid = self
            .resolve_reference(reference)
            .ok_or_else(|| CacheError::Reference {
                reference: reference.to_string(),
            })?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|source| CacheError::Checkout {
                reference: reference.to_string(),
                source,
            })?;
        let mut options = git2::build::CheckoutBuilder::new();
        options.force().remove_untracked(true);
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut options))
            .map_err(|source| CacheError::Checkout {
                reference: reference.to_string(),
                source,
            })?;
        self.repo
            .set_head_detached(oid)
            .map_err(|source| CacheError::Checkout {
                reference: reference.to_string(),
                source,
            })?;
        tracing::debug!(reference, commit = %oid, "checked out");
        Ok(oid.to_string())
    }

    /// Check out `reference`, or the detected default branch when absent.
    pub fn checkout_or_default(&self, reference: Option<&str>) -> Result<String, CacheError> {
        match reference.filter(|r| !r.is_empty()) {
            Some(r) => self.checkout(r),
            None => {
                let branch = self.default_branch();
                self.checkout(&branch)
            }
        }
    }

    /// First of {main, master, develop, dev} that exists, else HEAD.
    pub fn default_branch(&self) -> String {
        for name in DEFAULT_BRANCHES {
            if self.branch_exists(name) {
                return name.to_string();
            }
        }
        if let Ok(head) = self.repo.head()
            && let Some(name) = head.shorthand()
            && name != "HEAD"
        {
            return name.to_string();
        }
        "main".to_string()
    }

    /// Commit id at HEAD of the checked-out worktree.
    pub fn latest_commit(&self) -> Result<String, CacheError> {
        let head = self.repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    fn branch_exists(&self, name: &str) -> bool {
        self.repo
            .refname_to_id(&format!("refs/heads/{name}"))
            .is_ok()
            || self
                .repo
                .refname_to_id(&format!("refs/remotes/origin/{name}"))
                .is_ok()
    }

    fn resolve_reference(&self, reference: &str) -> Option<Oid> {
        // Branch: the remote-tracking ref is freshest after a fetch, the
        // local ref covers clones without an origin.
        for prefix in ["refs/remotes/origin/", "refs/heads/"] {
            if let Ok(oid) = self.repo.refname_to_id(&format!("{prefix}{reference}")) {
                return Some(oid);
            }
        }
        // Tag, peeled to its commit.
        if let Ok(tag_ref) = self.repo.find_reference(&format!("refs/tags/{reference}"))
            && let Ok(obj) = tag_ref.peel(git2::ObjectType::Commit)
        {
            return Some(obj.id());
        }
        // Full commit hash.
        if reference.len() == 40
            && reference.bytes().all(|b| b.is_ascii_hexdigit())
            && let Ok(oid) = Oid::from_str(reference)
            && self.repo.find_commit(oid).is_ok()
        {
            return Some(oid);
        }
        None
    }
}

/// Cache directory name for a URL: a readable sanitized name plus an
/// 8-hex disambiguator.
pub fn cache_dir_name(url: &str) -> String {
    let digest = hash::hash_bytes(url.as_bytes());
    format!("{}-{}", sanitize_repo_name(url), &digest[..8])
}

fn sanitize_repo_name(url: &str) -> String {
    let mut name = url.to_string();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.to_string();
        }
    }
    if let Some(rest) = name.strip_prefix("git@") {
        name = rest.replacen(':', "/", 1);
    }
    if let Some(rest) = name.strip_suffix(".git") {
        name = rest.to_string();
    }
    let mut name: String = name
        .chars()
        .map(|c| match c {
            '/' | ':' | '.' => '-',
            other => other,
        })
        .collect();
    name.truncate(50);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_names_strip_protocol_and_suffix() {
        assert_eq!(
            sanitize_repo_name("https://github.com/user/repo.git"),
            "github-com-user-repo"
        );
        assert_eq!(
            sanitize_repo_name("git@github.com:user/repo.git"),
            "github-com-user-repo"
        );
        assert_eq!(sanitize_repo_name("http://host/a/b"), "host-a-b");
    }

    #[test]
    fn cache_dir_name_disambiguates_by_url() {
        let a = cache_dir_name("https://github.com/user/repo.git");
        let b = cache_dir_name("git@github.com:user/repo.git");
        assert!(a.starts_with("github-com-user-repo-"));
        assert_ne!(a, b, "different URLs must map to different directories");
    }

    #[test]
    fn long_names_are_truncated() {
        let url = format!("https://example.com/{}", "x".repeat(120));
        let name = cache_dir_name(&url);
        // 50 chars of name, dash, 8 hex chars.
        assert_eq!(name.len(), 50 + 1 + 8);
    }
}
