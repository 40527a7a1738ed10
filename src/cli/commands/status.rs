use std::collections::BTreeMap;
use std::path::Path;

use crate::config;
use crate::engine::SyncError;
use crate::hash::{self, ConflictKind, ExcludeSet, FileConflict};

/// Show configured sources and how the local tree relates to the tracked
/// hashes. Never touches the network.
pub fn run(work_dir: &Path) -> crate::Result<i32> {
    let cfg = config::load(work_dir)?;
    if cfg.sources.is_empty() {
        println!("No sources configured");
        return Ok(0);
    }

    for source in &cfg.sources {
        println!("{} ({})", source.name, source.repository);
        for spec in &source.paths {
            let destination = spec.destination();
            if spec.files.is_empty() {
                println!("  {} -> {destination} (never synced)", spec.include);
                continue;
            }
            let conflicts = local_conflicts(work_dir, destination, spec)?;
            if conflicts.is_empty() {
                println!(
                    "  {} -> {destination} ({} file(s), clean)",
                    spec.include,
                    spec.files.len()
                );
            } else {
                println!(
                    "  {} -> {destination} ({} file(s), {} local change(s))",
                    spec.include,
                    spec.files.len(),
                    conflicts.len()
                );
                for conflict in conflicts {
                    println!("    {conflict}");
                }
            }
        }
    }
    Ok(0)
}

fn local_conflicts(
    work_dir: &Path,
    destination: &str,
    spec: &crate::config::PathSpec,
) -> crate::Result<Vec<FileConflict>> {
    let root = work_dir.join(destination);
    let expected: BTreeMap<String, String> = spec
        .files
        .iter()
        .map(|(rel, tracking)| (rel.clone(), tracking.hash.clone()))
        .collect();

    if root.is_dir() {
        let excludes = ExcludeSet::new(&spec.exclude);
        return Ok(hash::verify_tree(&root, &expected, &excludes).map_err(SyncError::from)?);
    }

    // Single tracked file: the destination itself is the one entry.
    let mut conflicts = Vec::new();
    for (rel, want) in &expected {
        if !root.is_file() {
            conflicts.push(FileConflict {
                path: rel.clone(),
                kind: ConflictKind::Deleted,
                expected: Some(want.clone()),
                actual: None,
            });
            continue;
        }
        let got = hash::hash_file(&root).map_err(SyncError::from)?;
        if got != *want {
            conflicts.push(FileConflict {
                path: rel.clone(),
                kind: ConflictKind::Modified,
                expected: Some(want.clone()),
                actual: Some(got),
            });
        }
    }
    Ok(conflicts)
}
