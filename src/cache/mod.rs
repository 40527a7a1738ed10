//! Shared on-disk caches: one clone per remote URL, plus the base-content
//! snapshots that make three-way merges possible.

mod auth;
mod repos;
mod snapshots;

pub use repos::{CacheError, CachedRepo, CachedRepoInfo, RepoCache};
pub use snapshots::{SnapshotError, SnapshotStore};
