//! Conflict branch management in the consumer's own repository.
//!
//! When a merge cannot be resolved automatically, the remote variants are
//! committed to a fresh timestamped branch so the operator can resolve the
//! conflict with standard git tooling. The consumer's worktree is returned
//! to the original branch whether the operation succeeds or fails.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{BranchType, Repository, Signature};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

const AUTHOR_NAME: &str = "cherry-go";
const AUTHOR_EMAIL: &str = "cherry-go@local";

#[derive(Error, Debug)]
pub enum BranchError {
    #[error("failed to open repository at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to read HEAD: {0}")]
    Head(#[source] git2::Error),

    #[error("failed to create branch '{branch}': {source}")]
    Create {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to checkout '{branch}': {source}")]
    Checkout {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("failed to delete branch '{branch}': {source}")]
    Delete {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("{source}; additionally, returning to '{original}' failed: {restore}")]
    RestoreFailed {
        original: String,
        #[source]
        source: Box<BranchError>,
        restore: git2::Error,
    },

    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// A created conflict branch.
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch: String,
    pub original: String,
    pub committed: Vec<String>,
}

/// Commit `files` (destination-relative path → remote bytes) onto a new
/// branch named `<prefix>/<source>-<yyyymmdd-hhmmss>`, then return to the
/// original branch.
///
/// The worktree is left on the original branch at return, success or
/// failure, as long as the initial HEAD read succeeded; when the return
/// itself fails, both errors are reported.
pub fn create_branch(
    work_dir: &Path,
    prefix: &str,
    source_name: &str,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<BranchOutcome, BranchError> {
    let repo = Repository::open(work_dir).map_err(|source| BranchError::Open {
        path: work_dir.to_path_buf(),
        source,
    })?;

    let head = repo.head().map_err(BranchError::Head)?;
    let original_refname = head
        .name()
        .map(str::to_string)
        .ok_or_else(|| BranchError::Head(git2::Error::from_str("HEAD name is not utf-8")))?;
    let original = head.shorthand().unwrap_or("HEAD").to_string();
    let head_commit = head.peel_to_commit().map_err(BranchError::Head)?;

    let branch = format!("{prefix}/{source_name}-{}", timestamp());

    repo.branch(&branch, &head_commit, false)
        .map_err(|source| BranchError::Create {
            branch: branch.clone(),
            source,
        })?;

    let result = populate_branch(&repo, work_dir, &branch, source_name, files);
    match result {
        Ok(committed) => {
            checkout_ref(&repo, &original_refname).map_err(|source| BranchError::Checkout {
                branch: original.clone(),
                source,
            })?;
            Ok(BranchOutcome {
                branch,
                original,
                committed,
            })
        }
        Err(e) => match checkout_ref(&repo, &original_refname) {
            Ok(()) => Err(e),
            Err(restore) => Err(BranchError::RestoreFailed {
                original,
                source: Box::new(e),
                restore,
            }),
        },
    }
}

fn populate_branch(
    repo: &Repository,
    work_dir: &Path,
    branch: &str,
    source_name: &str,
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<String>, BranchError> {
    checkout_ref(repo, &format!("refs/heads/{branch}")).map_err(|source| {
        BranchError::Checkout {
            branch: branch.to_string(),
            source,
        }
    })?;

    let mut index = repo.index()?;
    let mut committed = Vec::new();
    for (rel, content) in files {
        let full = work_dir.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|source| BranchError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&full, content).map_err(|source| BranchError::Write {
            path: full.clone(),
            source,
        })?;
        index
            .add_path(Path::new(rel))
            .map_err(|source| BranchError::Stage {
                path: PathBuf::from(rel),
                source,
            })?;
        committed.push(rel.clone());
    }
    index.write()?;

    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;
    let sig = Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?;
    let parent = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(BranchError::Head)?;
    let message = format!(
        "cherry-go: remote changes from {source_name}\n\n\
         This branch contains the remote changes that conflicted with local modifications.\n\
         Use 'git merge {branch}' from your original branch to resolve conflicts."
    );
    repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])
        .map_err(BranchError::Commit)?;

    Ok(committed)
}

fn checkout_ref(repo: &Repository, refname: &str) -> Result<(), git2::Error> {
    repo.set_head(refname)?;
    let mut options = git2::build::CheckoutBuilder::new();
    options.force();
    repo.checkout_head(Some(&mut options))
}

/// Operator hint text for a freshly created conflict branch.
pub fn merge_instructions(outcome: &BranchOutcome) -> String {
    let mut text = String::new();
    text.push_str("Merge conflicts - remote changes saved to branch\n\n");
    text.push_str(&format!("Branch: {}\n", outcome.branch));
    if !outcome.committed.is_empty() {
        text.push_str("\nFiles with conflicts:\n");
        for file in &outcome.committed {
            text.push_str(&format!("  - {file}\n"));
        }
    }
    text.push_str("\nReview the changes in the branch and merge when ready.\n");
    text.push_str("The branch contains the remote version - adjust as needed before merging.\n\n");
    text.push_str(&format!("  git diff {}    # review changes\n", outcome.branch));
    text.push_str(&format!("  git merge {}   # merge when ready\n", outcome.branch));
    text.push_str(&format!(
        "  git branch -d {}   # delete branch after merge\n",
        outcome.branch
    ));
    text
}

/// Branch names under `prefix/` in the consumer repository.
pub fn list(work_dir: &Path, prefix: &str) -> Result<Vec<String>, BranchError> {
    let repo = Repository::open(work_dir).map_err(|source| BranchError::Open {
        path: work_dir.to_path_buf(),
        source,
    })?;
    let mut names = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()?
            && name.starts_with(&format!("{prefix}/"))
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn delete(work_dir: &Path, name: &str) -> Result<(), BranchError> {
    let repo = Repository::open(work_dir).map_err(|source| BranchError::Open {
        path: work_dir.to_path_buf(),
        source,
    })?;
    let mut branch =
        repo.find_branch(name, BranchType::Local)
            .map_err(|source| BranchError::Delete {
                branch: name.to_string(),
                source,
            })?;
    branch.delete().map_err(|source| BranchError::Delete {
        branch: name.to_string(),
        source,
    })
}

/// Delete every branch under `prefix/`. Returns the deleted names.
pub fn delete_all(work_dir: &Path, prefix: &str) -> Result<Vec<String>, BranchError> {
    let names = list(work_dir, prefix)?;
    let mut deleted = Vec::new();
    for name in names {
        delete(work_dir, &name)?;
        deleted.push(name);
    }
    Ok(deleted)
}

fn timestamp() -> String {
    let format = format_description!("[year][month][day]-[hour][minute][second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000-000000".to_string())
}
