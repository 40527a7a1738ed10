use std::path::Path;

use crate::cli::{Cli, SyncArgs};
use crate::config;
use crate::engine::{Decision, RunContext, SourceReport, SyncMode};
use crate::sync::{SourceResult, SyncOutcome, sync_all, sync_one};

pub fn run(cli: &Cli, args: &SyncArgs, work_dir: &Path) -> crate::Result<i32> {
    let mut cfg = config::load(work_dir)?;
    if cfg.sources.is_empty() {
        println!("No sources configured to sync");
        return Ok(0);
    }

    let mut mode = args.effective_mode();
    if mode == SyncMode::Merge && cfg.options.create_branch {
        mode = SyncMode::Branch;
    }
    let run = RunContext {
        dry_run: cli.dry_run,
        show_diffs: cli.verbose >= 2,
        ..RunContext::default()
    };

    let results = match &args.source {
        Some(name) => vec![sync_one(
            name,
            &mut cfg,
            work_dir,
            mode,
            &run,
            args.autocommit,
        )?],
        None => {
            println!("Syncing {} source(s)...", cfg.sources.len());
            sync_all(&mut cfg, work_dir, mode, &run, args.autocommit)?
        }
    };

    let mut exit = 0;
    for result in &results {
        render_result(result);
        match result.outcome {
            SyncOutcome::Error | SyncOutcome::ConflictsReported => exit = 1,
            SyncOutcome::Success | SyncOutcome::UpToDate | SyncOutcome::BranchCreated => {}
        }
    }
    Ok(exit)
}

fn render_result(result: &SourceResult) {
    match result.outcome {
        SyncOutcome::UpToDate => println!("{}: up to date", result.source),
        SyncOutcome::Success => println!(
            "{}: synced ({} path(s) updated)",
            result.source,
            result.updated_paths().len()
        ),
        SyncOutcome::BranchCreated => {
            println!("{}: conflicts moved to a branch", result.source);
        }
        SyncOutcome::ConflictsReported => {
            println!("{}: conflicts detected", result.source);
        }
        SyncOutcome::Error => {
            if let Some(e) = &result.error {
                eprintln!("{}: sync failed: {e}", result.source);
            } else {
                eprintln!("{}: sync failed", result.source);
            }
        }
    }
    if let Some(report) = &result.report {
        render_report(report);
    }
}

fn render_report(report: &SourceReport) {
    for path in &report.paths {
        if let Some(e) = &path.error {
            eprintln!("  {}: {e}", path.include);
        }
        for decision in &path.decisions {
            match decision.decision {
                Decision::Unchanged => {}
                Decision::AdoptedRemote => println!("  + {} (remote adopted)", decision.path),
                Decision::KeptLocal => println!("  = {} (local kept)", decision.path),
                Decision::Merged => println!("  ~ {} (merged)", decision.path),
                Decision::Conflict(reason) => {
                    println!("  ! {} (conflict: {reason})", decision.path)
                }
            }
        }
    }
    if let Some(branch) = &report.branch {
        print!("{}", crate::branch::merge_instructions(branch));
    }
    if report.commit_suppressed {
        println!("  conflict markers written; auto-commit suppressed, resolve and commit manually");
    }
}
