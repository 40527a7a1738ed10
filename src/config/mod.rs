mod load;
mod schema;

pub use load::{config_path, load, load_from, save, save_to};
pub use schema::{
    AuthConfig, AuthType, Config, DEFAULT_BRANCH_PREFIX, DEFAULT_COMMIT_PREFIX, DEFAULT_VERSION,
    FileTracking, PathSpec, Source, SyncOptions,
};

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or persisting the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
