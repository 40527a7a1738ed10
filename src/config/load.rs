use std::fs;
use std::path::{Path, PathBuf};

use super::{Config, ConfigError};

pub const CONFIG_FILE: &str = ".cherry-go.toml";

/// Default configuration path inside a consumer working directory.
pub fn config_path(work_dir: &Path) -> PathBuf {
    work_dir.join(CONFIG_FILE)
}

/// Load the configuration for a working directory, falling back to
/// defaults when no file exists yet.
pub fn load(work_dir: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path(work_dir))
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if config.version.is_empty() {
        config.version = super::schema::DEFAULT_VERSION.to_string();
    }
    if config.options.commit_prefix.is_empty() {
        config.options.commit_prefix = super::schema::DEFAULT_COMMIT_PREFIX.to_string();
    }
    if config.options.branch_prefix.is_empty() {
        config.options.branch_prefix = super::schema::DEFAULT_BRANCH_PREFIX.to_string();
    }
    Ok(config)
}

pub fn save(work_dir: &Path, config: &Config) -> Result<(), ConfigError> {
    save_to(&config_path(work_dir), config)
}

/// Persist the configuration atomically: render, write to a temp file in
/// the same directory, then rename into place.
pub fn save_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|source| ConfigError::Write {
        path: dir.clone(),
        source,
    })?;
    let contents = toml::to_string_pretty(config)?;
    let temp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| ConfigError::Write {
        path: dir.clone(),
        source,
    })?;
    fs::write(temp.path(), contents.as_bytes()).map_err(|source| ConfigError::Write {
        path: temp.path().to_path_buf(),
        source,
    })?;
    temp.persist(path).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use crate::config::{AuthConfig, FileTracking, PathSpec, Source};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load(dir.path()).expect("load");
        assert!(cfg.sources.is_empty());
        assert_eq!(cfg.options.commit_prefix, "cherry-go: sync");
    }

    #[test]
    fn roundtrip_preserves_sources_and_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut files = BTreeMap::new();
        files.insert(
            "helpers.js".to_string(),
            FileTracking {
                hash: "ab".repeat(32),
                last_commit: Some("deadbeef".into()),
            },
        );
        let mut cfg = Config::default();
        cfg.upsert_source(Source {
            name: "mylib".into(),
            repository: "https://example.com/mylib.git".into(),
            auth: AuthConfig::default(),
            paths: vec![PathSpec {
                include: "src/utils".into(),
                exclude: vec!["*.test.js".into()],
                local_path: Some("vendor/utils".into()),
                branch: Some("main".into()),
                files,
            }],
        });

        save(dir.path(), &cfg).expect("save");
        let loaded = load(dir.path()).expect("load");
        assert_eq!(loaded.sources.len(), 1);
        let source = &loaded.sources[0];
        assert_eq!(source.name, "mylib");
        let spec = &source.paths[0];
        assert_eq!(spec.destination(), "vendor/utils");
        assert_eq!(spec.branch.as_deref(), Some("main"));
        assert_eq!(spec.exclude, vec!["*.test.js"]);
        let tracking = spec.files.get("helpers.js").expect("tracked file");
        assert_eq!(tracking.hash, "ab".repeat(32));
        assert_eq!(tracking.last_commit.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = Config::default();
        save(dir.path(), &cfg).expect("save defaults");
        cfg.version = "2.0".into();
        save(dir.path(), &cfg).expect("save again");
        let loaded = load(dir.path()).expect("load");
        assert_eq!(loaded.version, "2.0");
    }
}
