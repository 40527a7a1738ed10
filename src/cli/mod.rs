//! CLI surface for cherry-go.
//!
//! Thin handlers over the library: parse, dispatch, render structured
//! results as messages. The engine itself never prints.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::engine::SyncMode;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "cherry-go",
    version,
    about = "Partial, version-aware sync of files from remote git repositories",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Consumer working directory (default: current directory).
    #[arg(long, global = true, value_name = "PATH")]
    pub work_dir: Option<PathBuf>,

    /// Compute and report everything, write nothing.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Errors only.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize tracked paths from remote sources.
    Sync(SyncArgs),

    /// Show tracked sources and local divergence.
    Status,

    /// Repository cache operations.
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },

    /// Conflict branch operations.
    Branch {
        #[command(subcommand)]
        cmd: BranchCmd,
    },
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source to sync (default: all configured sources).
    pub source: Option<String>,

    /// Reconciliation mode.
    #[arg(long, value_enum, default_value_t = ModeArg::Detect)]
    pub mode: ModeArg,

    /// Overwrite local changes with the remote version (--mode force).
    #[arg(long, conflicts_with = "mode")]
    pub force: bool,

    /// Attempt three-way merges (--mode merge).
    #[arg(long, conflicts_with_all = ["mode", "force"])]
    pub merge: bool,

    /// On merge conflicts, commit the remote variants to a new branch.
    #[arg(long = "branch-on-conflict", conflicts_with_all = ["mode", "force"])]
    pub branch_on_conflict: bool,

    /// On merge conflicts, write conflict markers for manual resolution.
    #[arg(long = "mark-conflicts", conflicts_with_all = ["mode", "force", "branch_on_conflict"])]
    pub mark_conflicts: bool,

    /// Override the configured auto-commit behavior for this run.
    #[arg(long, value_name = "BOOL")]
    pub autocommit: Option<bool>,
}

impl SyncArgs {
    /// Flag precedence: the conflict-handling flags imply merge.
    pub fn effective_mode(&self) -> SyncMode {
        if self.mark_conflicts {
            SyncMode::MarkConflicts
        } else if self.branch_on_conflict {
            SyncMode::Branch
        } else if self.force {
            SyncMode::Force
        } else if self.merge {
            SyncMode::Merge
        } else {
            self.mode.into()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Detect,
    Force,
    Merge,
    Branch,
    MarkConflicts,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Detect => SyncMode::Detect,
            ModeArg::Force => SyncMode::Force,
            ModeArg::Merge => SyncMode::Merge,
            ModeArg::Branch => SyncMode::Branch,
            ModeArg::MarkConflicts => SyncMode::MarkConflicts,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// List cached repository clones.
    List,
    /// Remove clones older than the given age.
    Clean {
        /// Maximum age in days.
        #[arg(long, default_value_t = 30)]
        days: u64,
    },
    /// Show the total cache size.
    Size,
    /// Remove base-content snapshots for sources no longer configured.
    Prune,
}

#[derive(Subcommand, Debug)]
pub enum BranchCmd {
    /// List conflict branches.
    List,
    /// Delete one conflict branch.
    Delete { name: String },
    /// Delete every conflict branch.
    DeleteAll,
}

/// Initialize tracing from the `LOG` env var and the verbosity flags.
pub fn init_tracing(quiet: bool, verbose: u8) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_env("LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("cherry_rs={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Dispatch a parsed invocation; returns the process exit code.
pub fn run(cli: Cli) -> i32 {
    let work_dir = match cli.work_dir.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: failed to resolve working directory: {e}");
            return 1;
        }
    };

    let result = match cli.command {
        Commands::Sync(ref args) => commands::sync::run(&cli, args, &work_dir),
        Commands::Status => commands::status::run(&work_dir),
        Commands::Cache { ref cmd } => commands::cache::run(cmd, &work_dir),
        Commands::Branch { ref cmd } => commands::branch::run(cmd, &work_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
