//! Sync orchestration.
//!
//! Fans reconciliation out with one thread per source and aggregates the
//! results. Inside a source, path specs stay strictly sequential; across
//! sources the only shared state is the repo cache (per-clone checkout
//! locks), the snapshot store (disjoint directories), and the consumer
//! tree (conflict-branch creation serialized by a gate).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crossbeam::channel;

use crate::cache::{RepoCache, SnapshotStore};
use crate::config::{self, Config, Source, SyncOptions};
use crate::engine::{Engine, PersistHashes, RunContext, SourceReport, SyncError, SyncMode};

/// Exit semantics of one source's sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    UpToDate,
    ConflictsReported,
    BranchCreated,
    Error,
}

/// Aggregated result for one source.
#[derive(Debug)]
pub struct SourceResult {
    pub source: String,
    pub outcome: SyncOutcome,
    pub report: Option<SourceReport>,
    pub error: Option<SyncError>,
    /// Remote HEAD observed for this run, for commit messages.
    pub commit: Option<String>,
}

impl SourceResult {
    fn failed(source: String, error: SyncError) -> Self {
        Self {
            source,
            outcome: SyncOutcome::Error,
            report: None,
            error: Some(error),
            commit: None,
        }
    }

    pub fn updated_paths(&self) -> Vec<String> {
        self.report
            .as_ref()
            .map(SourceReport::updated_paths)
            .unwrap_or_default()
    }
}

/// Flushes a source's refreshed hash maps into the on-disk configuration
/// as soon as its path spec completes, so earlier successes survive a
/// later failure.
struct ConfigPersister {
    path: PathBuf,
    config: Mutex<Config>,
}

impl ConfigPersister {
    fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    fn into_config(self) -> Config {
        self.config
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistHashes for ConfigPersister {
    fn persist(&self, source: &Source) -> Result<(), SyncError> {
        let mut cfg = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        cfg.upsert_source(source.clone());
        config::save_to(&self.path, &cfg).map_err(|e| SyncError::Persist(e.to_string()))
    }
}

/// Synchronize every configured source, in parallel, under `mode`.
///
/// `config` is updated in place with the refreshed per-file hashes and
/// has already been persisted to disk when this returns. Results come
/// back in configured source order.
pub fn sync_all(
    config: &mut Config,
    work_dir: &Path,
    mode: SyncMode,
    run: &RunContext,
    auto_commit_override: Option<bool>,
) -> crate::Result<Vec<SourceResult>> {
    let cache = RepoCache::open_default()?;
    let snapshots = SnapshotStore::open_default()?;
    let persister = ConfigPersister::new(config::config_path(work_dir), config.clone());
    let branch_gate = Mutex::new(());
    let mut options = config.options.clone();
    if let Some(auto_commit) = auto_commit_override {
        options.auto_commit = auto_commit;
    }

    let (tx, rx) = channel::unbounded();
    std::thread::scope(|scope| {
        for source in &config.sources {
            let tx = tx.clone();
            let mut source = source.clone();
            let cache = &cache;
            let snapshots = &snapshots;
            let persister = &persister;
            let branch_gate = &branch_gate;
            let options = &options;
            scope.spawn(move || {
                let result = sync_source(
                    &mut source,
                    cache,
                    snapshots,
                    persister,
                    branch_gate,
                    work_dir,
                    mode,
                    run,
                    options,
                );
                let _ = tx.send(result);
            });
        }
    });
    drop(tx);

    let mut results: Vec<SourceResult> = rx.iter().collect();
    let order: HashMap<&str, usize> = config
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    results.sort_by_key(|r| order.get(r.source.as_str()).copied().unwrap_or(usize::MAX));

    *config = persister.into_config();
    Ok(results)
}

/// Synchronize a single named source.
pub fn sync_one(
    name: &str,
    config: &mut Config,
    work_dir: &Path,
    mode: SyncMode,
    run: &RunContext,
    auto_commit_override: Option<bool>,
) -> crate::Result<SourceResult> {
    let Some(source) = config.source(name) else {
        return Err(SyncError::UnknownSource(name.to_string()).into());
    };
    let mut source = source.clone();

    let cache = RepoCache::open_default()?;
    let snapshots = SnapshotStore::open_default()?;
    let persister = ConfigPersister::new(config::config_path(work_dir), config.clone());
    let branch_gate = Mutex::new(());
    let mut options = config.options.clone();
    if let Some(auto_commit) = auto_commit_override {
        options.auto_commit = auto_commit;
    }

    let result = sync_source(
        &mut source,
        &cache,
        &snapshots,
        &persister,
        &branch_gate,
        work_dir,
        mode,
        run,
        &options,
    );
    *config = persister.into_config();
    Ok(result)
}

/// The per-source pipeline: ensure clone, pull, reconcile, auto-commit.
#[allow(clippy::too_many_arguments)]
fn sync_source(
    source: &mut Source,
    cache: &RepoCache,
    snapshots: &SnapshotStore,
    persist: &dyn PersistHashes,
    branch_gate: &Mutex<()>,
    work_dir: &Path,
    mode: SyncMode,
    run: &RunContext,
    options: &SyncOptions,
) -> SourceResult {
    let name = source.name.clone();

    // A cache failure here prevents any checkout: the whole source skips.
    let repo = match cache.open_or_clone(&source.repository, &source.auth) {
        Ok(repo) => repo,
        Err(e) => return SourceResult::failed(name, e.into()),
    };
    if let Err(e) = repo.pull() {
        return SourceResult::failed(name, e.into());
    }

    let engine = Engine::new(snapshots, run, persist).with_branch_gate(branch_gate);
    let report = match engine.sync_source(source, &repo, work_dir, mode, options) {
        Ok(report) => report,
        Err(e) => return SourceResult::failed(name, e),
    };
    let commit = repo.latest_commit().ok();

    let updated = report.updated_paths();
    let should_commit = options.auto_commit
        && !updated.is_empty()
        && !run.dry_run
        && !report.commit_suppressed
        && mode != SyncMode::Detect;
    if should_commit {
        let short = commit
            .as_deref()
            .map(|c| &c[..c.len().min(8)])
            .unwrap_or("unknown");
        let message = format!(
            "{} {} from {} ({})",
            options.commit_prefix, name, source.repository, short
        );
        match commit_updates(work_dir, &message, &updated) {
            Ok(()) => tracing::info!(source = %name, "created commit: {message}"),
            Err(e) => tracing::warn!(source = %name, "auto-commit failed: {e}"),
        }
    }

    let outcome = if report.branch.is_some() {
        SyncOutcome::BranchCreated
    } else if report.has_conflicts() {
        SyncOutcome::ConflictsReported
    } else if report.has_errors() {
        SyncOutcome::Error
    } else if updated.is_empty() {
        SyncOutcome::UpToDate
    } else {
        SyncOutcome::Success
    };

    SourceResult {
        source: name,
        outcome,
        report: Some(report),
        error: None,
        commit,
    }
}

/// Stage the updated destinations and commit in the consumer repository
/// with the fixed tool identity.
fn commit_updates(work_dir: &Path, message: &str, paths: &[String]) -> Result<(), git2::Error> {
    let repo = git2::Repository::open(work_dir)?;
    let mut index = repo.index()?;
    for path in paths {
        if work_dir.join(path).is_dir() {
            index.add_all([path.as_str()], git2::IndexAddOption::DEFAULT, None)?;
        } else {
            index.add_path(Path::new(path))?;
        }
    }
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let sig = git2::Signature::now("cherry-go", "cherry-go@local")?;
    let parents: Vec<git2::Commit<'_>> = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok())
        .into_iter()
        .collect();
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
    Ok(())
}
