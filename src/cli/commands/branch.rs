use std::path::Path;

use crate::branch;
use crate::cli::BranchCmd;
use crate::config;
use crate::engine::SyncError;

pub fn run(cmd: &BranchCmd, work_dir: &Path) -> crate::Result<i32> {
    let cfg = config::load(work_dir)?;
    let prefix = &cfg.options.branch_prefix;
    match cmd {
        BranchCmd::List => {
            let branches = branch::list(work_dir, prefix).map_err(SyncError::from)?;
            if branches.is_empty() {
                println!("No conflict branches");
                return Ok(0);
            }
            for name in branches {
                println!("{name}");
            }
        }
        BranchCmd::Delete { name } => {
            branch::delete(work_dir, name).map_err(SyncError::from)?;
            println!("Deleted {name}");
        }
        BranchCmd::DeleteAll => {
            let deleted = branch::delete_all(work_dir, prefix).map_err(SyncError::from)?;
            println!("Deleted {} branch(es)", deleted.len());
            for name in deleted {
                println!("  {name}");
            }
        }
    }
    Ok(0)
}
