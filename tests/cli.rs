//! Smoke tests for the cherry-go binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn cherry_go() -> Command {
    Command::cargo_bin("cherry-go").expect("binary built")
}

#[test]
fn help_lists_subcommands() {
    cherry_go()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn status_without_config_reports_no_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    cherry_go()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sources configured"));
}

#[test]
fn sync_without_sources_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    cherry_go()
        .current_dir(dir.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sources configured to sync"));
}

#[test]
fn unknown_mode_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    cherry_go()
        .current_dir(dir.path())
        .args(["sync", "--mode", "rebase"])
        .assert()
        .failure();
}

#[test]
fn conflicting_mode_flags_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    cherry_go()
        .current_dir(dir.path())
        .args(["sync", "--force", "--merge"])
        .assert()
        .failure();
}
