use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_COMMIT_PREFIX: &str = "cherry-go: sync";
pub const DEFAULT_BRANCH_PREFIX: &str = "cherry-go/sync";

/// The configuration document: tracked sources plus sync options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub sources: Vec<Source>,
    pub options: SyncOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            sources: Vec::new(),
            options: SyncOptions::default(),
        }
    }
}

impl Config {
    /// Add a source, replacing any existing source with the same name.
    pub fn upsert_source(&mut self, source: Source) {
        match self.sources.iter_mut().find(|s| s.name == source.name) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    /// Remove a source by name. Returns whether anything was removed.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);
        self.sources.len() != before
    }

    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn source_mut(&mut self, name: &str) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.name == name)
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }
}

/// Behavior knobs for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub auto_commit: bool,
    pub commit_prefix: String,
    pub create_branch: bool,
    pub branch_prefix: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            auto_commit: true,
            commit_prefix: DEFAULT_COMMIT_PREFIX.to_string(),
            create_branch: false,
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
        }
    }
}

/// A named remote repository with its tracked paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub repository: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub paths: Vec<PathSpec>,
}

/// One tracked location inside a source: a repository-relative file or
/// directory, its destination, the reference to track, and the per-file
/// records from the last successful sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathSpec {
    pub include: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileTracking>,
}

impl PathSpec {
    pub fn new(include: impl Into<String>) -> Self {
        Self {
            include: include.into(),
            ..Self::default()
        }
    }

    /// Destination path relative to the consumer tree; defaults to
    /// `include` when no explicit local path is set.
    pub fn destination(&self) -> &str {
        match self.local_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.include,
        }
    }
}

/// Per-file record: the hash of the bytes last materialized and,
/// optionally, the remote commit observed at that sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTracking {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
}

/// Authentication descriptor. Opaque to the reconciliation engine; only
/// the repository cache interprets it. Secrets never live here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Auto,
    Ssh,
    Basic,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.version, "1.0");
        assert!(cfg.options.auto_commit);
        assert_eq!(cfg.options.commit_prefix, "cherry-go: sync");
        assert_eq!(cfg.options.branch_prefix, "cherry-go/sync");
        assert!(!cfg.options.create_branch);
    }

    #[test]
    fn destination_defaults_to_include() {
        let spec = PathSpec::new("src/utils");
        assert_eq!(spec.destination(), "src/utils");

        let spec = PathSpec {
            local_path: Some("vendor/utils".into()),
            ..PathSpec::new("src/utils")
        };
        assert_eq!(spec.destination(), "vendor/utils");

        let spec = PathSpec {
            local_path: Some(String::new()),
            ..PathSpec::new("src/utils")
        };
        assert_eq!(spec.destination(), "src/utils");
    }

    #[test]
    fn upsert_replaces_by_name() {
        let mut cfg = Config::default();
        cfg.upsert_source(Source {
            name: "lib".into(),
            repository: "https://example.com/a.git".into(),
            auth: AuthConfig::default(),
            paths: vec![],
        });
        cfg.upsert_source(Source {
            name: "lib".into(),
            repository: "https://example.com/b.git".into(),
            auth: AuthConfig::default(),
            paths: vec![],
        });
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].repository, "https://example.com/b.git");
        assert!(cfg.remove_source("lib"));
        assert!(!cfg.remove_source("lib"));
    }
}
