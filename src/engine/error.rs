//! Sync error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::branch::BranchError;
use crate::cache::{CacheError, SnapshotError};
use crate::error::{Effect, Transience};
use crate::hash::HashError;

/// Errors that can occur while reconciling a source.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source path does not exist in repository: {path}")]
    MissingSourcePath { path: PathBuf },

    #[error("merge conflicts in '{include}': {files:?}")]
    MergeConflict { include: String, files: Vec<String> },

    #[error("no base snapshot for '{include}'; sync once with force or detect first")]
    NoBase { include: String },

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error("overlapping path specs in source '{source_name}': '{first}' and '{second}'")]
    Overlap {
        source_name: String,
        first: String,
        second: String,
    },

    #[error("unknown sync mode '{0}'")]
    UnknownMode(String),

    #[error("source '{0}' is not configured")]
    UnknownSource(String),

    #[error("failed to persist updated hashes: {0}")]
    Persist(String),
}

impl SyncError {
    /// Whether retrying this sync may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            SyncError::Cache(CacheError::Clone { .. })
            | SyncError::Cache(CacheError::Fetch { .. })
            | SyncError::Io { .. }
            | SyncError::Persist(_) => Transience::Retryable,

            SyncError::Cache(_)
            | SyncError::Snapshot(_)
            | SyncError::Hash(_)
            | SyncError::MissingSourcePath { .. }
            | SyncError::MergeConflict { .. }
            | SyncError::NoBase { .. }
            | SyncError::Branch(_)
            | SyncError::Overlap { .. }
            | SyncError::UnknownMode(_)
            | SyncError::UnknownSource(_) => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Detected before any work touches the destination.
            SyncError::Overlap { .. }
            | SyncError::UnknownMode(_)
            | SyncError::UnknownSource(_)
            | SyncError::MissingSourcePath { .. }
            | SyncError::Cache(_) => Effect::None,

            // The branch manager restores the original branch best-effort;
            // a persist failure happens after files were written.
            SyncError::Branch(_) | SyncError::Persist(_) => Effect::Some,

            SyncError::Snapshot(_)
            | SyncError::Hash(_)
            | SyncError::Io { .. }
            | SyncError::MergeConflict { .. }
            | SyncError::NoBase { .. } => Effect::Unknown,
        }
    }
}
