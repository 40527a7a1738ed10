#![allow(dead_code)]

use std::fs;
use std::path::Path;

use git2::{Commit, Repository, RepositoryInitOptions, Signature};

pub fn init_repo(path: &Path) -> Result<Repository, String> {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("refs/heads/main");
    let repo = Repository::init_opts(path, &opts)
        .map_err(|err| format!("git init failed for {path:?}: {err}"))?;
    configure_test_repo(&repo)?;
    Ok(repo)
}

/// Write `files` into the worktree and commit them on the current branch.
pub fn commit_files(
    repo: &Repository,
    files: &[(&str, &[u8])],
    message: &str,
) -> Result<String, String> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| "bare repository not supported".to_string())?;
    for (rel, content) in files {
        let full = workdir.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|err| format!("mkdir {parent:?} failed: {err}"))?;
        }
        fs::write(&full, content).map_err(|err| format!("write {full:?} failed: {err}"))?;
    }
    let mut index = repo
        .index()
        .map_err(|err| format!("open index failed: {err}"))?;
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .map_err(|err| format!("stage failed: {err}"))?;
    index.write().map_err(|err| format!("index write failed: {err}"))?;
    let tree_oid = index
        .write_tree()
        .map_err(|err| format!("write tree failed: {err}"))?;
    let tree = repo
        .find_tree(tree_oid)
        .map_err(|err| format!("find tree failed: {err}"))?;
    let sig = signature()?;
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    let oid = repo
        .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .map_err(|err| format!("commit failed: {err}"))?;
    Ok(oid.to_string())
}

/// Create `branch` from HEAD, commit `files` on it, then return to the
/// branch that was checked out before.
pub fn commit_on_branch(
    repo: &Repository,
    branch: &str,
    files: &[(&str, &[u8])],
    message: &str,
) -> Result<String, String> {
    let head = repo.head().map_err(|err| format!("HEAD failed: {err}"))?;
    let original = head
        .name()
        .ok_or_else(|| "HEAD name not utf-8".to_string())?
        .to_string();
    let head_commit = head
        .peel_to_commit()
        .map_err(|err| format!("peel HEAD failed: {err}"))?;
    repo.branch(branch, &head_commit, false)
        .map_err(|err| format!("branch {branch} failed: {err}"))?;
    checkout(repo, &format!("refs/heads/{branch}"))?;
    let oid = commit_files(repo, files, message)?;
    checkout(repo, &original)?;
    Ok(oid)
}

pub fn tag(repo: &Repository, name: &str) -> Result<(), String> {
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|err| format!("peel HEAD failed: {err}"))?;
    repo.tag_lightweight(name, head.as_object(), false)
        .map_err(|err| format!("tag {name} failed: {err}"))?;
    Ok(())
}

pub fn head_branch(repo_dir: &Path) -> Result<String, String> {
    let repo =
        Repository::open(repo_dir).map_err(|err| format!("open {repo_dir:?} failed: {err}"))?;
    let head = repo.head().map_err(|err| format!("HEAD failed: {err}"))?;
    Ok(head.shorthand().unwrap_or("HEAD").to_string())
}

/// Content of `rel` at the tip of `branch`, or None when absent.
pub fn branch_file(repo_dir: &Path, branch: &str, rel: &str) -> Result<Option<Vec<u8>>, String> {
    let repo =
        Repository::open(repo_dir).map_err(|err| format!("open {repo_dir:?} failed: {err}"))?;
    let reference = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .map_err(|err| format!("branch {branch} not found: {err}"))?;
    let commit = reference
        .peel_to_commit()
        .map_err(|err| format!("peel {branch} failed: {err}"))?;
    let tree = commit
        .tree()
        .map_err(|err| format!("tree of {branch} failed: {err}"))?;
    let entry = match tree.get_path(Path::new(rel)) {
        Ok(entry) => entry,
        Err(_) => return Ok(None),
    };
    let blob = repo
        .find_blob(entry.id())
        .map_err(|err| format!("blob {rel} failed: {err}"))?;
    Ok(Some(blob.content().to_vec()))
}

fn checkout(repo: &Repository, refname: &str) -> Result<(), String> {
    repo.set_head(refname)
        .map_err(|err| format!("set head {refname} failed: {err}"))?;
    let mut options = git2::build::CheckoutBuilder::new();
    options.force();
    repo.checkout_head(Some(&mut options))
        .map_err(|err| format!("checkout {refname} failed: {err}"))
}

fn configure_test_repo(repo: &Repository) -> Result<(), String> {
    let mut cfg = repo
        .config()
        .map_err(|err| format!("open repo config failed: {err}"))?;
    cfg.set_str("user.name", "Test")
        .map_err(|err| format!("set user.name failed: {err}"))?;
    cfg.set_str("user.email", "test@test.com")
        .map_err(|err| format!("set user.email failed: {err}"))?;
    Ok(())
}

fn signature() -> Result<Signature<'static>, String> {
    Signature::now("Test", "test@test.com").map_err(|err| format!("signature failed: {err}"))
}
