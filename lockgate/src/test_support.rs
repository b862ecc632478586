//! Test-only helpers: throwaway git repositories, lock fixtures and a
//! recording process runner.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::core::types::ProcessOutput;
use crate::error::GateResult;
use crate::io::process::{CommandSpec, ProcessRunner};

/// A git repository in a temp directory with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Self { dir };
        repo.git(&["init", "--quiet", "--initial-branch=main"]);
        repo.git(&["config", "user.name", "lockgate tests"]);
        repo.git(&["config", "user.email", "lockgate@example.invalid"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.write("README.md", "test repo\n");
        repo.commit_all("initial");
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file relative to the repo root, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Run git in the repo and return trimmed stdout; panics on failure.
    pub fn git(&self, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .expect("spawn git");
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "--all"]);
        self.git(&["commit", "--quiet", "-m", message]);
    }

    pub fn current_branch(&self) -> String {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Add a linked worktree on a new `branch`, in its own temp directory.
    ///
    /// Keep the returned `TempDir` alive for as long as the worktree is used.
    pub fn linked_worktree(&self, branch: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("worktree tempdir");
        let path = dir.path().join("wt");
        let path_arg = path.to_string_lossy().into_owned();
        self.git(&["worktree", "add", "--quiet", "-b", branch, &path_arg]);
        (dir, path)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `Lock/<file_name>` under `root` and backdate its mtime by `age_days`.
pub fn write_lock(root: &Path, file_name: &str, contents: &str, age_days: u64) -> PathBuf {
    let dir = root.join("Lock");
    fs::create_dir_all(&dir).expect("create Lock dir");
    let path = dir.join(file_name);
    fs::write(&path, contents).expect("write lock");
    let modified = SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60);
    fs::File::options()
        .write(true)
        .open(&path)
        .and_then(|file| file.set_modified(modified))
        .expect("set mtime");
    path
}

/// Runner that records every command and answers from a script.
///
/// A scripted response applies when the command line starts with its prefix;
/// the first match wins. Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct SpyRunner {
    calls: RefCell<Vec<String>>,
    script: Vec<(String, ProcessOutput)>,
}

impl SpyRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, prefix: &str, output: ProcessOutput) -> Self {
        self.script.push((prefix.to_string(), output));
        self
    }

    /// Command lines seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.borrow().iter().any(|call| call.starts_with(prefix))
    }
}

impl ProcessRunner for SpyRunner {
    fn run(&self, spec: &CommandSpec) -> GateResult<ProcessOutput> {
        let line = spec.display();
        self.calls.borrow_mut().push(line.clone());
        let output = self
            .script
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ProcessOutput::ok(""));
        Ok(output)
    }
}
