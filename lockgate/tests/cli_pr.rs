//! CLI tests for `lockgate pr`.
//!
//! Spawns the lockgate binary against throwaway repositories and checks exit
//! codes, stderr reporting and which side effects happened.

use std::fs;
use std::process::{Command, Output};

use lockgate::exit_codes;
use lockgate::test_support::TestRepo;

fn lockgate(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lockgate"))
        .current_dir(repo.root())
        .args(args)
        .output()
        .expect("lockgate")
}

#[test]
fn active_lock_blocks_pr_before_validation() {
    let repo = TestRepo::new();
    repo.write(
        "Lock/LOCKED-db-migration.md",
        "owner: @alice\nstatus: active\n\n# Lock: db-migration\n",
    );
    repo.commit_all("claim db migration");
    repo.write("README.md", "changed\n");

    let out = lockgate(
        &repo,
        &["pr", "--title", "chore: tweak", "--test", "touch ran.txt"],
    );

    assert_eq!(out.status.code(), Some(exit_codes::CONFLICT));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("LOCKED-db-migration.md"), "stderr: {stderr}");
    assert!(!repo.root().join("ran.txt").exists());
    assert_eq!(repo.current_branch(), "main");
    assert!(!repo.root().join(".git/lockgate.lock").exists());
}

#[test]
fn failing_validation_exit_code_passes_through() {
    let repo = TestRepo::new();
    repo.write("README.md", "changed\n");

    let out = lockgate(&repo, &["pr", "--title", "t", "--test", "exit 5"]);

    assert_eq!(out.status.code(), Some(5));
    assert_eq!(repo.current_branch(), "main");
}

#[test]
fn missing_validation_command_is_config_error() {
    let repo = TestRepo::new();
    let out = lockgate(&repo, &["pr", "--title", "t"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILURE));
    assert!(String::from_utf8_lossy(&out.stderr).contains("validation command"));
}

#[test]
fn clean_tree_ends_with_nothing_to_commit() {
    let repo = TestRepo::new();

    let out = lockgate(
        &repo,
        &["pr", "--branch", "chore/noop", "--title", "t", "--test", "true"],
    );

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&out.stdout).contains("nothing to commit"));
    assert_eq!(repo.git(&["log", "--oneline"]).lines().count(), 1);
}

#[test]
fn full_run_pushes_branch_and_calls_pr_tool() {
    let repo = TestRepo::new();
    let remote = tempfile::tempdir().expect("tempdir");
    let status = Command::new("git")
        .args(["init", "--quiet", "--bare"])
        .current_dir(remote.path())
        .status()
        .expect("git init --bare");
    assert!(status.success());
    let remote_path = remote.path().to_string_lossy().into_owned();
    repo.git(&["remote", "add", "origin", &remote_path]);
    repo.write(
        "lockgate.toml",
        "[pipeline]\nvalidate_command = \"true\"\npr_command = [\"echo\"]\n",
    );
    repo.write("Lock/LOCKED-old.md", "owner: @bob\nstatus: released\n\n");
    repo.commit_all("configure lockgate");
    repo.write("README.md", "changed\n");

    let out = lockgate(
        &repo,
        &["pr", "--branch", "chore/tweak", "--title", "chore: tweak"],
    );

    assert_eq!(
        out.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("PR created"));
    assert_eq!(repo.current_branch(), "chore/tweak");
    assert_eq!(repo.git(&["log", "-1", "--format=%s"]), "chore: tweak");

    let pushed = Command::new("git")
        .args(["rev-parse", "--verify", "refs/heads/chore/tweak"])
        .current_dir(remote.path())
        .output()
        .expect("git rev-parse");
    assert!(pushed.status.success());
    assert!(!repo.root().join(".git/lockgate.lock").exists());
    assert_eq!(
        fs::read_to_string(repo.root().join("README.md")).expect("read"),
        "changed\n"
    );
}

#[test]
fn qualified_release_status_still_blocks_pr() {
    let repo = TestRepo::new();
    repo.write(
        "Lock/LOCKED-api.md",
        "owner: @carol\nstatus: active until released\n\n",
    );
    repo.commit_all("claim api");
    repo.write("README.md", "changed\n");

    let out = lockgate(&repo, &["pr", "--title", "t", "--test", "touch ran.txt"]);

    assert_eq!(out.status.code(), Some(exit_codes::CONFLICT));
    assert!(String::from_utf8_lossy(&out.stderr).contains("LOCKED-api.md"));
    assert!(!repo.root().join("ran.txt").exists());
}

#[test]
fn active_lock_blocks_pr_in_linked_worktree() {
    let repo = TestRepo::new();
    repo.write("Lock/LOCKED-db.md", "owner: @alice\nstatus: active\n\n");
    repo.commit_all("claim db");
    let (_keep, worktree) = repo.linked_worktree("feature");
    fs::write(worktree.join("README.md"), "changed in worktree\n").expect("write");

    let out = Command::new(env!("CARGO_BIN_EXE_lockgate"))
        .current_dir(&worktree)
        .args(["pr", "--title", "t", "--test", "touch ran.txt"])
        .output()
        .expect("lockgate");

    assert_eq!(
        out.status.code(),
        Some(exit_codes::CONFLICT),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(String::from_utf8_lossy(&out.stderr).contains("LOCKED-db.md"));
    assert!(!worktree.join("ran.txt").exists());
}
