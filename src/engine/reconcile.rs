//! Per-path-spec reconciliation.
//!
//! Implements the decision procedure: checkout, existence check, cheap
//! equality, then per-file three-way decisions in alphabetical order.
//! Hash maps and snapshots are replaced only when every file of the spec
//! resolved under the active mode.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ConflictReason, Decision, Engine, FileDecision, PathReport, SyncError, SyncMode};
use crate::cache::CachedRepo;
use crate::config::{FileTracking, PathSpec};
use crate::hash::{self, ExcludeSet};
use crate::merge;

pub(super) struct SpecOutcome {
    pub report: PathReport,
    /// Remote rendition for conflict-branch assembly (branch mode only),
    /// keyed by destination-relative path.
    pub branch_files: BTreeMap<String, Vec<u8>>,
    /// Whether the spec's hash map changed and must be flushed before the
    /// next spec starts.
    pub map_changed: bool,
}

pub(super) fn sync_path_spec(
    engine: &Engine<'_>,
    source_name: &str,
    spec: &mut PathSpec,
    repo: &CachedRepo,
    work_dir: &Path,
    mode: SyncMode,
) -> SpecOutcome {
    let mut out = SpecOutcome {
        report: PathReport {
            include: spec.include.clone(),
            destination: spec.destination().to_string(),
            decisions: Vec::new(),
            updated: false,
            error: None,
        },
        branch_files: BTreeMap::new(),
        map_changed: false,
    };
    if let Err(e) = reconcile(engine, source_name, spec, repo, work_dir, mode, &mut out) {
        tracing::warn!(
            source = source_name,
            include = %spec.include,
            "path spec skipped: {e}"
        );
        out.report.error = Some(e);
    }
    out
}

fn reconcile(
    engine: &Engine<'_>,
    source_name: &str,
    spec: &mut PathSpec,
    repo: &CachedRepo,
    work_dir: &Path,
    mode: SyncMode,
    out: &mut SpecOutcome,
) -> Result<(), SyncError> {
    let commit = repo.checkout_or_default(spec.branch.as_deref())?;

    let source_path = repo.path().join(&spec.include);
    if !source_path.exists() {
        return Err(SyncError::MissingSourcePath { path: source_path });
    }
    let is_dir = source_path.is_dir();
    let dest_root = work_dir.join(&out.report.destination);
    let excludes = ExcludeSet::new(&spec.exclude);

    let remote = read_remote(&spec.include, &source_path, is_dir, &excludes)?;
    let local = read_local(&dest_root, is_dir, &remote)?;

    let differs = remote
        .iter()
        .any(|(rel, bytes)| local.get(rel).and_then(|o| o.as_deref()) != Some(bytes.as_slice()));

    if !differs {
        // Idempotent refresh: same hashes, fresh commit marker. Detect
        // stays fully pure.
        if mode != SyncMode::Detect && !engine.run().dry_run {
            spec.files = tracking_map(&remote, &commit);
            if !engine.snapshots().has(source_name, &spec.include) {
                engine.snapshots().save(source_name, &spec.include, &remote)?;
            }
            out.map_changed = true;
        }
        return Ok(());
    }

    match mode {
        SyncMode::Detect => {
            detect(engine, &remote, &local, out);
            Ok(())
        }
        SyncMode::Force => force(
            engine,
            source_name,
            spec,
            &commit,
            &remote,
            &local,
            &dest_root,
            is_dir,
            out,
        ),
        SyncMode::Merge | SyncMode::Branch | SyncMode::MarkConflicts => three_way(
            engine,
            source_name,
            spec,
            mode,
            &commit,
            &remote,
            &local,
            &dest_root,
            is_dir,
            out,
        ),
    }
}

/// Detect mode: report a conflict per differing file, touch nothing.
fn detect(
    engine: &Engine<'_>,
    remote: &BTreeMap<String, Vec<u8>>,
    local: &BTreeMap<String, Option<Vec<u8>>>,
    out: &mut SpecOutcome,
) {
    for (rel, remote_bytes) in remote {
        let local_bytes = local.get(rel).and_then(Option::as_deref);
        if local_bytes == Some(remote_bytes.as_slice()) {
            continue;
        }
        if engine.run().show_diffs
            && let Some(local_bytes) = local_bytes
        {
            tracing::debug!(
                file = %rel,
                local_lines = count_lines(local_bytes),
                remote_lines = count_lines(remote_bytes),
                "local content diverges from remote"
            );
        }
        out.report.decisions.push(FileDecision {
            path: rel.clone(),
            decision: Decision::Conflict(ConflictReason::Diverged),
        });
    }
}

/// Force mode: the remote version wins for every differing file.
#[allow(clippy::too_many_arguments)]
fn force(
    engine: &Engine<'_>,
    source_name: &str,
    spec: &mut PathSpec,
    commit: &str,
    remote: &BTreeMap<String, Vec<u8>>,
    local: &BTreeMap<String, Option<Vec<u8>>>,
    dest_root: &Path,
    is_dir: bool,
    out: &mut SpecOutcome,
) -> Result<(), SyncError> {
    for (rel, remote_bytes) in remote {
        let unchanged = local.get(rel).and_then(|o| o.as_deref()) == Some(remote_bytes.as_slice());
        if !unchanged && !engine.run().dry_run {
            write_file(&dest_path(dest_root, rel, is_dir), remote_bytes)?;
        }
        out.report.decisions.push(FileDecision {
            path: rel.clone(),
            decision: if unchanged {
                Decision::Unchanged
            } else {
                Decision::AdoptedRemote
            },
        });
    }
    if !engine.run().dry_run {
        spec.files = tracking_map(remote, commit);
        engine.snapshots().save(source_name, &spec.include, remote)?;
        out.map_changed = true;
        out.report.updated = true;
    }
    Ok(())
}

/// Merge-family modes: per-file three-way decisions against the base
/// snapshot, in alphabetical relative-path order.
#[allow(clippy::too_many_arguments)]
fn three_way(
    engine: &Engine<'_>,
    source_name: &str,
    spec: &mut PathSpec,
    mode: SyncMode,
    commit: &str,
    remote: &BTreeMap<String, Vec<u8>>,
    local: &BTreeMap<String, Option<Vec<u8>>>,
    dest_root: &Path,
    is_dir: bool,
    out: &mut SpecOutcome,
) -> Result<(), SyncError> {
    let had_snapshot = engine.snapshots().has(source_name, &spec.include);
    let base = engine.snapshots().get(source_name, &spec.include)?;

    let mut new_content: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut conflict_files: Vec<String> = Vec::new();

    for (rel, remote_bytes) in remote {
        let local_bytes = local.get(rel).and_then(|o| o.as_deref());
        let base_bytes = base.get(rel).map(Vec::as_slice);
        match decide_file(mode, base_bytes, local_bytes, remote_bytes) {
            FileAction::Resolve {
                decision,
                bytes,
                write,
            } => {
                if write && !engine.run().dry_run {
                    write_file(&dest_path(dest_root, rel, is_dir), &bytes)?;
                }
                new_content.insert(rel.clone(), bytes);
                out.report.decisions.push(FileDecision {
                    path: rel.clone(),
                    decision,
                });
            }
            FileAction::Conflict { reason, marked } => {
                conflict_files.push(rel.clone());
                if let Some(buffer) = marked
                    && !engine.run().dry_run
                {
                    write_file(&dest_path(dest_root, rel, is_dir), &buffer)?;
                }
                out.report.decisions.push(FileDecision {
                    path: rel.clone(),
                    decision: Decision::Conflict(reason),
                });
            }
        }
    }

    if !conflict_files.is_empty() && matches!(mode, SyncMode::Merge | SyncMode::Branch) {
        // Abort the spec: hash map and snapshot stay as they were. Files
        // that already merged cleanly remain on disk.
        if mode == SyncMode::Branch {
            out.branch_files = branch_rendition(&out.report.destination, is_dir, remote);
        }
        out.report.error = Some(if had_snapshot {
            SyncError::MergeConflict {
                include: spec.include.clone(),
                files: conflict_files,
            }
        } else {
            SyncError::NoBase {
                include: spec.include.clone(),
            }
        });
        return Ok(());
    }

    // All files resolved, or markers were written under MarkConflicts: the
    // map and snapshot cover exactly the cleanly resolved files.
    if !engine.run().dry_run {
        spec.files = tracking_map(&new_content, commit);
        engine
            .snapshots()
            .save(source_name, &spec.include, &new_content)?;
        out.map_changed = true;
        out.report.updated = true;
    }
    Ok(())
}

enum FileAction {
    Resolve {
        decision: Decision,
        bytes: Vec<u8>,
        write: bool,
    },
    Conflict {
        reason: ConflictReason,
        marked: Option<Vec<u8>>,
    },
}

/// The per-file decision table for the merge-family modes.
fn decide_file(
    mode: SyncMode,
    base: Option<&[u8]>,
    local: Option<&[u8]>,
    remote: &[u8],
) -> FileAction {
    let Some(local) = local else {
        return FileAction::Resolve {
            decision: Decision::AdoptedRemote,
            bytes: remote.to_vec(),
            write: true,
        };
    };
    if local == remote {
        return FileAction::Resolve {
            decision: Decision::Unchanged,
            bytes: local.to_vec(),
            write: false,
        };
    }

    // Binary content is never merged: equality or bust.
    let binary =
        merge::is_binary(local) || merge::is_binary(remote) || base.is_some_and(merge::is_binary);
    if binary {
        return match base {
            Some(b) if b == local => FileAction::Resolve {
                decision: Decision::AdoptedRemote,
                bytes: remote.to_vec(),
                write: true,
            },
            Some(b) if b == remote => FileAction::Resolve {
                decision: Decision::KeptLocal,
                bytes: local.to_vec(),
                write: false,
            },
            _ => FileAction::Conflict {
                reason: ConflictReason::Binary,
                marked: None,
            },
        };
    }

    let Some(base) = base else {
        return FileAction::Conflict {
            reason: ConflictReason::NoBase,
            marked: None,
        };
    };
    if base == local {
        return FileAction::Resolve {
            decision: Decision::AdoptedRemote,
            bytes: remote.to_vec(),
            write: true,
        };
    }
    if base == remote {
        return FileAction::Resolve {
            decision: Decision::KeptLocal,
            bytes: local.to_vec(),
            write: false,
        };
    }

    let merged = merge::three_way_merge(base, local, remote);
    if merged.clean {
        return FileAction::Resolve {
            decision: Decision::Merged,
            bytes: merged.content,
            write: true,
        };
    }
    match mode {
        SyncMode::MarkConflicts => FileAction::Conflict {
            reason: ConflictReason::Marked,
            marked: Some(merged.content),
        },
        _ => FileAction::Conflict {
            reason: ConflictReason::Unmerged,
            marked: None,
        },
    }
}

/// Read the remote rendition of a spec from the cache worktree.
///
/// Keys are relative paths with forward slashes; a single-file spec maps
/// to its basename.
fn read_remote(
    include: &str,
    source_path: &Path,
    is_dir: bool,
    excludes: &ExcludeSet,
) -> Result<BTreeMap<String, Vec<u8>>, SyncError> {
    let mut files = BTreeMap::new();
    if !is_dir {
        files.insert(file_key(include), read_bytes(source_path)?);
        return Ok(files);
    }
    for entry in WalkDir::new(source_path).sort_by_file_name() {
        let entry = entry.map_err(|e| SyncError::Io {
            path: source_path.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk failed")),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = hash::relative_unix(source_path, entry.path());
        if rel == ".git" || rel.starts_with(".git/") || excludes.matches(&rel) {
            continue;
        }
        files.insert(rel, read_bytes(entry.path())?);
    }
    Ok(files)
}

/// Read the local counterpart of every remote file; absent files read as
/// `None`, any other failure aborts the spec.
fn read_local(
    dest_root: &Path,
    is_dir: bool,
    remote: &BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, Option<Vec<u8>>>, SyncError> {
    let mut files = BTreeMap::new();
    for rel in remote.keys() {
        let path = dest_path(dest_root, rel, is_dir);
        match fs::read(&path) {
            Ok(bytes) => {
                files.insert(rel.clone(), Some(bytes));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                files.insert(rel.clone(), None);
            }
            Err(source) => return Err(SyncError::Io { path, source }),
        }
    }
    Ok(files)
}

fn branch_rendition(
    destination: &str,
    is_dir: bool,
    remote: &BTreeMap<String, Vec<u8>>,
) -> BTreeMap<String, Vec<u8>> {
    remote
        .iter()
        .map(|(rel, bytes)| {
            let key = if is_dir {
                format!("{}/{rel}", destination.trim_end_matches('/'))
            } else {
                destination.to_string()
            };
            (key, bytes.clone())
        })
        .collect()
}

fn tracking_map(
    content: &BTreeMap<String, Vec<u8>>,
    commit: &str,
) -> BTreeMap<String, FileTracking> {
    content
        .iter()
        .map(|(rel, bytes)| {
            (
                rel.clone(),
                FileTracking {
                    hash: hash::hash_bytes(bytes),
                    last_commit: Some(commit.to_string()),
                },
            )
        })
        .collect()
}

fn dest_path(dest_root: &Path, rel: &str, is_dir: bool) -> PathBuf {
    if is_dir {
        dest_root.join(rel)
    } else {
        dest_root.to_path_buf()
    }
}

/// Tracking key for a single-file include: its basename.
fn file_key(include: &str) -> String {
    let trimmed = include.trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, SyncError> {
    fs::read(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SyncError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, bytes).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn count_lines(bytes: &[u8]) -> usize {
    bytes.split(|&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(action: FileAction) -> (Decision, Vec<u8>, bool) {
        match action {
            FileAction::Resolve {
                decision,
                bytes,
                write,
            } => (decision, bytes, write),
            FileAction::Conflict { reason, .. } => panic!("unexpected conflict: {reason}"),
        }
    }

    fn conflict(action: FileAction) -> (ConflictReason, Option<Vec<u8>>) {
        match action {
            FileAction::Conflict { reason, marked } => (reason, marked),
            FileAction::Resolve { decision, .. } => panic!("unexpected resolution: {decision:?}"),
        }
    }

    #[test]
    fn absent_local_adopts_remote() {
        let (decision, bytes, write) =
            resolve(decide_file(SyncMode::Merge, None, None, b"remote\n"));
        assert_eq!(decision, Decision::AdoptedRemote);
        assert_eq!(bytes, b"remote\n");
        assert!(write);
    }

    #[test]
    fn equal_local_and_remote_is_unchanged() {
        let (decision, _, write) = resolve(decide_file(
            SyncMode::Merge,
            None,
            Some(b"same\n"),
            b"same\n",
        ));
        assert_eq!(decision, Decision::Unchanged);
        assert!(!write);
    }

    #[test]
    fn divergence_without_base_conflicts() {
        let (reason, marked) = conflict(decide_file(
            SyncMode::Merge,
            None,
            Some(b"local\n"),
            b"remote\n",
        ));
        assert_eq!(reason, ConflictReason::NoBase);
        assert!(marked.is_none());
    }

    #[test]
    fn local_at_base_adopts_remote() {
        let (decision, bytes, write) = resolve(decide_file(
            SyncMode::Merge,
            Some(b"base\n"),
            Some(b"base\n"),
            b"remote\n",
        ));
        assert_eq!(decision, Decision::AdoptedRemote);
        assert_eq!(bytes, b"remote\n");
        assert!(write);
    }

    #[test]
    fn remote_at_base_keeps_local() {
        let (decision, bytes, write) = resolve(decide_file(
            SyncMode::Merge,
            Some(b"base\n"),
            Some(b"local\n"),
            b"base\n",
        ));
        assert_eq!(decision, Decision::KeptLocal);
        assert_eq!(bytes, b"local\n");
        assert!(!write);
    }

    #[test]
    fn disjoint_changes_merge_cleanly() {
        let (decision, bytes, write) = resolve(decide_file(
            SyncMode::Merge,
            Some(b"a\nb\nc\nd\n"),
            Some(b"A\nb\nc\nd\n"),
            b"a\nb\nc\nD\n",
        ));
        assert_eq!(decision, Decision::Merged);
        assert_eq!(bytes, b"A\nb\nc\nD\n");
        assert!(write);
    }

    #[test]
    fn overlapping_changes_conflict_by_mode() {
        let base = b"a\nb\nc\n".as_slice();
        let local = b"a\nlocal\nc\n".as_slice();
        let remote = b"a\nremote\nc\n".as_slice();

        let (reason, marked) =
            conflict(decide_file(SyncMode::Merge, Some(base), Some(local), remote));
        assert_eq!(reason, ConflictReason::Unmerged);
        assert!(marked.is_none());

        let (reason, marked) = conflict(decide_file(
            SyncMode::MarkConflicts,
            Some(base),
            Some(local),
            remote,
        ));
        assert_eq!(reason, ConflictReason::Marked);
        let buffer = marked.expect("marked buffer");
        assert!(merge::contains_conflict_markers(&buffer));
    }

    #[test]
    fn differing_binaries_never_merge() {
        let (reason, _) = conflict(decide_file(
            SyncMode::Merge,
            None,
            Some(b"\x00local"),
            b"\x00remote",
        ));
        assert_eq!(reason, ConflictReason::Binary);

        // With a matching base the pairwise rules still apply.
        let (decision, bytes, _) = resolve(decide_file(
            SyncMode::Merge,
            Some(b"\x00old"),
            Some(b"\x00old"),
            b"\x00new",
        ));
        assert_eq!(decision, Decision::AdoptedRemote);
        assert_eq!(bytes, b"\x00new");
    }

    #[test]
    fn file_key_is_basename() {
        assert_eq!(file_key("src/components/header.js"), "header.js");
        assert_eq!(file_key("README.md"), "README.md");
        assert_eq!(file_key("dir/"), "dir");
    }

    #[test]
    fn branch_rendition_mirrors_destinations() {
        let mut remote = BTreeMap::new();
        remote.insert("helpers.js".to_string(), b"x".to_vec());

        let dir = branch_rendition("src/utils", true, &remote);
        assert_eq!(dir.keys().collect::<Vec<_>>(), vec!["src/utils/helpers.js"]);

        let file = branch_rendition("src/utils/helpers.js", false, &remote);
        assert_eq!(
            file.keys().collect::<Vec<_>>(),
            vec!["src/utils/helpers.js"]
        );
    }
}
