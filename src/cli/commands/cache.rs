use std::path::Path;

use crate::cache::{RepoCache, SnapshotStore};
use crate::cli::CacheCmd;
use crate::config;

pub fn run(cmd: &CacheCmd, work_dir: &Path) -> crate::Result<i32> {
    let cache = RepoCache::open_default().map_err(crate::engine::SyncError::from)?;
    match cmd {
        CacheCmd::List => {
            let repos = cache.list().map_err(crate::engine::SyncError::from)?;
            if repos.is_empty() {
                println!("Cache is empty");
                return Ok(0);
            }
            for repo in repos {
                println!("{}  {}", repo.name, repo.path.display());
            }
        }
        CacheCmd::Clean { days } => {
            let removed = cache
                .clean_older_than(*days)
                .map_err(crate::engine::SyncError::from)?;
            println!("Removed {} cached repositories", removed.len());
            for name in removed {
                println!("  {name}");
            }
        }
        CacheCmd::Size => {
            let bytes = cache.size_bytes().map_err(crate::engine::SyncError::from)?;
            println!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
        }
        CacheCmd::Prune => {
            let cfg = config::load(work_dir)?;
            let store = SnapshotStore::open_default().map_err(crate::engine::SyncError::from)?;
            let removed = store
                .prune(&cfg.source_names())
                .map_err(crate::engine::SyncError::from)?;
            println!("Removed {} orphaned snapshot set(s)", removed.len());
            for name in removed {
                println!("  {name}");
            }
        }
    }
    Ok(0)
}
