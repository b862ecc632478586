//! CLI tests for `lockgate guard`.

use std::process::{Command, Output};

use lockgate::exit_codes;
use lockgate::test_support::TestRepo;

fn guard(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lockgate"))
        .current_dir(repo.root())
        .env_remove("LOCKGATE_BASE_REF")
        .arg("guard")
        .args(args)
        .output()
        .expect("lockgate guard")
}

#[test]
fn staged_protected_paths_exit_with_violation() {
    let repo = TestRepo::new();
    repo.write("Lock/a.md", "owner: a\n\n");
    repo.write("src/x.js", "x\n");
    repo.write("tmp/y.log", "y\n");
    repo.git(&["add", "--all"]);

    let out = guard(&repo, &[]);

    assert_eq!(out.status.code(), Some(exit_codes::VIOLATION));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("2 protected path(s)"), "stderr: {stderr}");
    assert!(stderr.contains("  - Lock/a.md"));
    assert!(stderr.contains("  - tmp/y.log"));
    assert!(!stderr.contains("src/x.js"));
}

#[test]
fn clean_staged_set_passes() {
    let repo = TestRepo::new();
    repo.write("src/x.js", "x\n");
    repo.git(&["add", "--all"]);

    assert_eq!(guard(&repo, &[]).status.code(), Some(exit_codes::OK));
}

#[test]
fn ci_mode_reads_base_ref_from_env() {
    let repo = TestRepo::new();
    let base = repo.git(&["rev-parse", "HEAD"]);
    repo.write("Lock/LOCKED-x.md", "owner: a\n\n");
    repo.commit_all("touch lock dir");

    let out = Command::new(env!("CARGO_BIN_EXE_lockgate"))
        .current_dir(repo.root())
        .env("LOCKGATE_BASE_REF", &base)
        .arg("guard")
        .output()
        .expect("lockgate guard");

    assert_eq!(out.status.code(), Some(exit_codes::VIOLATION));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Lock/LOCKED-x.md"));
}

#[test]
fn unknown_base_ref_is_generic_failure() {
    let repo = TestRepo::new();
    let out = guard(&repo, &["--base-ref", "no-such-ref"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILURE));
}
