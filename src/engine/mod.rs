//! The reconciliation engine.
//!
//! For each tracked path spec it reads the three versions of every file —
//! the base snapshot from the last sync, the current local content, and
//! the freshly fetched remote content — and decides per file whether to
//! adopt, keep, merge, or surface a conflict, under the active sync mode.
//! Decisions drive the working tree, the per-file hash map, and the base
//! snapshot; collaborators (cache, snapshots, merger, branch manager) are
//! injected so tests can fake them.

mod error;
mod reconcile;

pub use error::SyncError;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::branch::{self, BranchOutcome};
use crate::cache::{CachedRepo, SnapshotStore};
use crate::config::{Source, SyncOptions};

/// Reconciliation policy for one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Report what would change; never write.
    #[default]
    Detect,
    /// Overwrite every differing file with the remote version.
    Force,
    /// Three-way merge per file; conflicts abort the path spec.
    Merge,
    /// Like `Merge`, but conflicted remote variants go to a new branch.
    Branch,
    /// Like `Merge`, but conflict markers are written for manual
    /// resolution and auto-commit is suppressed.
    MarkConflicts,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Detect => "detect",
            SyncMode::Force => "force",
            SyncMode::Merge => "merge",
            SyncMode::Branch => "branch",
            SyncMode::MarkConflicts => "mark-conflicts",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detect" => Ok(SyncMode::Detect),
            "force" => Ok(SyncMode::Force),
            "merge" => Ok(SyncMode::Merge),
            "branch" => Ok(SyncMode::Branch),
            "mark-conflicts" | "mark_conflicts" => Ok(SyncMode::MarkConflicts),
            other => Err(SyncError::UnknownMode(other.to_string())),
        }
    }
}

/// Why a file could not be reconciled automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Local and remote differ (detect mode).
    Diverged,
    /// Divergence without a base snapshot; a three-way merge is impossible.
    NoBase,
    /// Binary content differing on both sides.
    Binary,
    /// The three-way merge left overlapping hunks.
    Unmerged,
    /// Markers were written to the working tree for manual resolution.
    Marked,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictReason::Diverged => "modified",
            ConflictReason::NoBase => "no_base",
            ConflictReason::Binary => "binary",
            ConflictReason::Unmerged => "merge",
            ConflictReason::Marked => "marked",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file reconciliation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    AdoptedRemote,
    KeptLocal,
    Merged,
    Conflict(ConflictReason),
}

impl Decision {
    pub fn is_conflict(self) -> bool {
        matches!(self, Decision::Conflict(_))
    }
}

/// One file's decision inside a path report.
#[derive(Debug, Clone)]
pub struct FileDecision {
    pub path: String,
    pub decision: Decision,
}

/// Outcome of reconciling one path spec.
#[derive(Debug)]
pub struct PathReport {
    pub include: String,
    pub destination: String,
    pub decisions: Vec<FileDecision>,
    /// Whether the hash map and snapshot were replaced.
    pub updated: bool,
    pub error: Option<SyncError>,
}

impl PathReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &FileDecision> {
        self.decisions.iter().filter(|d| d.decision.is_conflict())
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts().next().is_some()
    }
}

/// Outcome of reconciling one source.
#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub paths: Vec<PathReport>,
    pub branch: Option<BranchOutcome>,
    /// Set under `MarkConflicts` when markers remained in the tree; the
    /// orchestrator must not auto-commit.
    pub commit_suppressed: bool,
}

impl SourceReport {
    /// Destinations whose hash maps were replaced, in path-spec order.
    pub fn updated_paths(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| p.updated)
            .map(|p| p.destination.clone())
            .collect()
    }

    pub fn has_conflicts(&self) -> bool {
        self.paths.iter().any(PathReport::has_conflicts)
    }

    pub fn has_errors(&self) -> bool {
        self.paths.iter().any(|p| p.error.is_some())
    }

    pub fn is_up_to_date(&self) -> bool {
        self.updated_paths().is_empty() && !self.has_conflicts() && !self.has_errors()
    }
}

/// Explicit run flags; no process-wide state.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Compute decisions but perform no writes anywhere.
    pub dry_run: bool,
    /// Emit per-file divergence detail through tracing.
    pub show_diffs: bool,
    /// Checked at path-spec boundaries; a cancelled run leaves completed
    /// specs persisted and in-progress specs untouched.
    pub cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// Seam through which the engine flushes a source's updated hash maps.
///
/// Called after every path spec that changed state, before the next spec
/// starts, so a later failure never rolls back an earlier success.
pub trait PersistHashes: Send + Sync {
    fn persist(&self, source: &Source) -> Result<(), SyncError>;
}

/// Persister that keeps state in memory only. Used by detect-style runs
/// and tests.
pub struct NoPersist;

impl PersistHashes for NoPersist {
    fn persist(&self, _source: &Source) -> Result<(), SyncError> {
        Ok(())
    }
}

/// The reconciliation engine, parameterized by its collaborators.
pub struct Engine<'a> {
    snapshots: &'a SnapshotStore,
    run: &'a RunContext,
    persist: &'a dyn PersistHashes,
    branch_gate: Option<&'a Mutex<()>>,
}

impl<'a> Engine<'a> {
    pub fn new(
        snapshots: &'a SnapshotStore,
        run: &'a RunContext,
        persist: &'a dyn PersistHashes,
    ) -> Self {
        Self {
            snapshots,
            run,
            persist,
            branch_gate: None,
        }
    }

    /// Serialize conflict-branch creation against other engine instances
    /// writing the same consumer tree.
    pub fn with_branch_gate(mut self, gate: &'a Mutex<()>) -> Self {
        self.branch_gate = Some(gate);
        self
    }

    /// Reconcile every path spec of `source` under `mode`.
    ///
    /// Path specs run sequentially in configured order; an error in one
    /// spec is recorded in its report and the rest proceed. Only an
    /// overlap among includes (config error) or a branch-creation failure
    /// aborts the whole source.
    pub fn sync_source(
        &self,
        source: &mut Source,
        repo: &CachedRepo,
        work_dir: &Path,
        mode: SyncMode,
        options: &SyncOptions,
    ) -> Result<SourceReport, SyncError> {
        validate_overlaps(source)?;

        let mut report = SourceReport {
            source: source.name.clone(),
            paths: Vec::new(),
            branch: None,
            commit_suppressed: false,
        };
        let mut branch_files: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        for index in 0..source.paths.len() {
            if self.run.cancelled() {
                tracing::info!(source = %source.name, "sync cancelled");
                break;
            }
            let outcome = reconcile::sync_path_spec(
                self,
                &source.name,
                &mut source.paths[index],
                repo,
                work_dir,
                mode,
            );
            if outcome.map_changed {
                self.persist.persist(source)?;
            }
            branch_files.extend(outcome.branch_files);
            report.paths.push(outcome.report);
        }

        if mode == SyncMode::MarkConflicts && report.has_conflicts() {
            report.commit_suppressed = true;
        }

        if mode == SyncMode::Branch && !branch_files.is_empty() && !self.run.dry_run {
            let _gate = self.branch_gate.map(|g| {
                g.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
            });
            let outcome = branch::create_branch(
                work_dir,
                &options.branch_prefix,
                &source.name,
                &branch_files,
            )?;
            tracing::info!(branch = %outcome.branch, "created conflict branch");
            report.branch = Some(outcome);
        }

        Ok(report)
    }

    pub(crate) fn snapshots(&self) -> &SnapshotStore {
        self.snapshots
    }

    pub(crate) fn run(&self) -> &RunContext {
        self.run
    }
}

/// Reject sources whose includes nest or duplicate (neither include may be
/// a path-prefix of another). Checked before any checkout.
fn validate_overlaps(source: &Source) -> Result<(), SyncError> {
    let normalized: Vec<String> = source
        .paths
        .iter()
        .map(|p| p.include.trim_matches('/').to_string())
        .collect();
    for (i, a) in normalized.iter().enumerate() {
        for b in normalized.iter().skip(i + 1) {
            let overlap = a == b
                || a.starts_with(&format!("{b}/"))
                || b.starts_with(&format!("{a}/"));
            if overlap {
                return Err(SyncError::Overlap {
                    source_name: source.name.clone(),
                    first: a.clone(),
                    second: b.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::PathSpec;

    fn source_with(includes: &[&str]) -> Source {
        Source {
            name: "lib".into(),
            repository: "https://example.com/lib.git".into(),
            auth: Default::default(),
            paths: includes.iter().map(|p| PathSpec::new(*p)).collect(),
        }
    }

    #[test]
    fn mode_parsing_roundtrips() {
        for mode in [
            SyncMode::Detect,
            SyncMode::Force,
            SyncMode::Merge,
            SyncMode::Branch,
            SyncMode::MarkConflicts,
        ] {
            assert_eq!(mode.as_str().parse::<SyncMode>().unwrap(), mode);
        }
        assert!(matches!(
            "rebase".parse::<SyncMode>(),
            Err(SyncError::UnknownMode(_))
        ));
    }

    #[test]
    fn disjoint_includes_validate() {
        let source = source_with(&["src/utils", "src/components/header.js", "docs"]);
        assert!(validate_overlaps(&source).is_ok());
    }

    #[test]
    fn nested_includes_are_rejected() {
        let source = source_with(&["src", "src/utils"]);
        assert!(matches!(
            validate_overlaps(&source),
            Err(SyncError::Overlap { .. })
        ));
    }

    #[test]
    fn duplicate_includes_are_rejected() {
        let source = source_with(&["src/utils", "src/utils/"]);
        assert!(matches!(
            validate_overlaps(&source),
            Err(SyncError::Overlap { .. })
        ));
    }

    #[test]
    fn sibling_prefix_names_do_not_overlap() {
        // "src/util" is not a path-prefix of "src/utils".
        let source = source_with(&["src/util", "src/utils"]);
        assert!(validate_overlaps(&source).is_ok());
    }
}
