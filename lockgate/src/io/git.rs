//! Git adapter for lockgate commands.
//!
//! Every call goes through a [`ProcessRunner`], so the pipeline and pruner can
//! be exercised with scripted git responses.

use std::path::PathBuf;

use tracing::{debug, instrument, warn};

use crate::core::types::ProcessOutput;
use crate::error::{GateError, GateResult};
use crate::io::process::{CommandSpec, ProcessRunner};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
pub struct Git<'r, R: ProcessRunner + ?Sized> {
    workdir: PathBuf,
    runner: &'r R,
}

impl<'r, R: ProcessRunner + ?Sized> Git<'r, R> {
    pub fn new(workdir: impl Into<PathBuf>, runner: &'r R) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
        }
    }

    /// Command spec for `git <args>` in this working directory.
    pub fn spec(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new("git", args.iter().copied(), self.workdir.clone())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> GateResult<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.stdout.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is fully clean (including untracked files).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> GateResult<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(changes = entries.len(), "worktree not clean");
        Err(GateError::DirtyTree {
            entries: entries
                .into_iter()
                .map(|entry| format!("{} {}", entry.code, entry.path))
                .collect(),
        })
    }

    /// Paths currently staged for commit.
    pub fn staged_paths(&self) -> GateResult<Vec<String>> {
        let out = self.run_checked(&["diff", "--cached", "--name-only", "-z"])?;
        Ok(split_nul(&out.stdout))
    }

    /// Paths that differ between `base_ref` and `HEAD` (`git diff <base_ref> HEAD`).
    #[instrument(skip_all, fields(base_ref = %base_ref))]
    pub fn diff_paths(&self, base_ref: &str) -> GateResult<Vec<String>> {
        let out = self.run_checked(&["diff", "--name-only", "-z", base_ref, "HEAD"])?;
        Ok(split_nul(&out.stdout))
    }

    /// Every path under `pathspec` named by any commit on any ref, one per
    /// line as git prints it. Names git quotes (control or non-ASCII
    /// characters) come back quoted.
    pub fn history_paths(&self, pathspec: &str) -> GateResult<Vec<String>> {
        let out = self.run_checked(&["log", "--all", "--format=", "--name-only", "--", pathspec])?;
        Ok(out
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Newest commit on any ref in which `path` exists (its deletion commit
    /// excluded), or `None` if git never tracked it.
    #[instrument(skip_all, fields(path = %path))]
    pub fn last_revision_with(&self, path: &str) -> GateResult<Option<String>> {
        let out = self.run_checked(&[
            "log",
            "--all",
            "-n",
            "1",
            "--diff-filter=d",
            "--format=%H",
            "--",
            path,
        ])?;
        let revision = out.stdout.trim();
        Ok((!revision.is_empty()).then(|| revision.to_string()))
    }

    /// Contents of `path` at `revision`.
    pub fn show_file(&self, revision: &str, path: &str) -> GateResult<String> {
        let object = format!("{revision}:{path}");
        Ok(self.run_checked(&["show", &object])?.stdout)
    }

    /// Resolve `name` inside this worktree's git directory
    /// (`git rev-parse --git-path`). Handles linked worktrees and submodules,
    /// where `.git` is a file rather than a directory.
    pub fn git_path(&self, name: &str) -> GateResult<PathBuf> {
        let out = self.run_checked(&["rev-parse", "--git-path", name])?;
        let raw = out.stdout.trim_end_matches(['\n', '\r']);
        if raw.is_empty() {
            return Err(GateError::ExternalTool {
                command: format!("git rev-parse --git-path {name}"),
                code: out.exit_code,
                stderr: "empty output".to_string(),
            });
        }
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            return Ok(path);
        }
        Ok(self.workdir.join(path))
    }

    fn run_checked(&self, args: &[&str]) -> GateResult<ProcessOutput> {
        let spec = self.spec(args);
        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(GateError::ExternalTool {
                command: spec.display(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Split `-z` output. Names are taken verbatim, so spaces and newlines survive.
fn split_nul(stdout: &str) -> Vec<String> {
    stdout
        .split('\0')
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_status_line(line: &str) -> GateResult<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(2) || !line.is_char_boundary(3) {
        return Err(GateError::ExternalTool {
            command: "git status --porcelain=v1".to_string(),
            code: Some(0),
            stderr: format!("unexpected porcelain line: '{line}'"),
        });
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SpyRunner;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(e.code, " M");
        assert_eq!(e.path, "src/main.rs");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn splits_nul_separated_names() {
        assert_eq!(
            split_nul("Lock/a.md\0src/x.js\0"),
            vec!["Lock/a.md".to_string(), "src/x.js".to_string()]
        );
        assert!(split_nul("").is_empty());
    }

    #[test]
    fn git_path_joins_relative_output_with_workdir() {
        let runner = SpyRunner::new().respond(
            "git rev-parse --git-path lockgate.lock",
            ProcessOutput::ok(".git/lockgate.lock\n"),
        );
        let path = Git::new("/repo", &runner)
            .git_path("lockgate.lock")
            .expect("git path");
        assert_eq!(path, PathBuf::from("/repo/.git/lockgate.lock"));
    }

    #[test]
    fn git_path_keeps_absolute_output() {
        let runner = SpyRunner::new().respond(
            "git rev-parse",
            ProcessOutput::ok("/main/.git/worktrees/wt/lockgate.lock\n"),
        );
        let path = Git::new("/wt", &runner)
            .git_path("lockgate.lock")
            .expect("git path");
        assert_eq!(path, PathBuf::from("/main/.git/worktrees/wt/lockgate.lock"));
    }

    #[test]
    fn keeps_spaces_and_newlines_in_names() {
        assert_eq!(
            split_nul(" lead.txt\0with space.md\0line\nbreak.md\0"),
            vec![
                " lead.txt".to_string(),
                "with space.md".to_string(),
                "line\nbreak.md".to_string(),
            ]
        );
    }
}
