#![forbid(unsafe_code)]

pub mod branch;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod merge;
mod paths;
pub mod sync;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types that make up the public sync surface.
pub use crate::branch::BranchOutcome;
pub use crate::cache::{CachedRepo, RepoCache, SnapshotStore};
pub use crate::config::{Config, FileTracking, PathSpec, Source, SyncOptions};
pub use crate::engine::{
    Decision, Engine, FileDecision, PathReport, RunContext, SourceReport, SyncMode,
};
pub use crate::sync::{SyncOutcome, sync_all, sync_one};
