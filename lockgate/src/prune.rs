//! Stale released lock pruning.
//!
//! Dry run by default. Applying requires a clean worktree and deletes only
//! records that carry a release marker and are older than the threshold.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, instrument, warn};

use crate::core::staleness::{
    SCAN_LIMIT_BYTES, age_days, age_threshold, is_release_candidate, is_stale,
};
use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::lock_store::{list_records, read_prefix};
use crate::io::mutex::{MutexLocation, WorktreeMutex};
use crate::io::process::ProcessRunner;

/// A lock file eligible for deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneCandidate {
    pub file_name: String,
    pub path: PathBuf,
    /// Age in days, rounded to one decimal.
    pub age_days: f64,
}

#[derive(Debug, Clone)]
pub struct PruneRequest {
    pub lock_dir: PathBuf,
    pub age_days: f64,
    pub apply: bool,
    pub worktree_mutex: MutexLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PruneOutcome {
    /// No candidates.
    NothingToDo,
    /// Candidates found, nothing deleted.
    DryRun { candidates: Vec<PruneCandidate> },
    /// Deletion attempted; `failed` pairs a file name with its error text.
    Applied {
        deleted: Vec<String>,
        failed: Vec<(String, String)>,
    },
}

/// Released records in `dir` untouched for at least `min_age_days`.
///
/// Lists a snapshot: a record edited after it is scanned is still judged by
/// the scanned content.
#[instrument(skip_all, fields(dir = %dir.display(), min_age_days = min_age_days))]
pub fn find_stale_released(
    dir: &Path,
    min_age_days: f64,
    now: SystemTime,
) -> GateResult<Vec<PruneCandidate>> {
    let threshold = age_threshold(min_age_days).map_err(GateError::Config)?;
    let mut candidates = Vec::new();
    for record in list_records(dir)? {
        if !is_stale(record.modified_at, now, threshold) {
            continue;
        }
        let scanned = read_prefix(&record.path, SCAN_LIMIT_BYTES)?;
        if !is_release_candidate(&record.status, &scanned) {
            debug!(file = %record.file_name, status = %record.status, "stale but not released");
            continue;
        }
        candidates.push(PruneCandidate {
            age_days: age_days(record.modified_at, now),
            file_name: record.file_name,
            path: record.path,
        });
    }
    debug!(count = candidates.len(), "prune candidates");
    Ok(candidates)
}

/// Find candidates and, when `request.apply` is set, delete them.
///
/// Apply mode refuses to touch anything unless `git status` is clean, and
/// holds the worktree mutex while deleting. A failed deletion is logged and
/// the loop continues with the next candidate.
#[instrument(skip_all, fields(apply = request.apply))]
pub fn prune<R: ProcessRunner + ?Sized>(
    root: &Path,
    runner: &R,
    request: &PruneRequest,
    now: SystemTime,
) -> GateResult<PruneOutcome> {
    if !request.apply {
        let candidates = find_stale_released(&request.lock_dir, request.age_days, now)?;
        if candidates.is_empty() {
            return Ok(PruneOutcome::NothingToDo);
        }
        return Ok(PruneOutcome::DryRun { candidates });
    }

    let git = Git::new(root, runner);
    let _mutex = WorktreeMutex::acquire_at(&request.worktree_mutex, &git, "prune")?;
    git.ensure_clean()?;

    let candidates = find_stale_released(&request.lock_dir, request.age_days, now)?;
    if candidates.is_empty() {
        return Ok(PruneOutcome::NothingToDo);
    }
    Ok(delete_candidates(candidates))
}

fn delete_candidates(candidates: Vec<PruneCandidate>) -> PruneOutcome {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    for candidate in candidates {
        match fs::remove_file(&candidate.path) {
            Ok(()) => {
                info!(file = %candidate.file_name, "deleted stale lock");
                deleted.push(candidate.file_name);
            }
            Err(err) => {
                warn!(file = %candidate.file_name, err = %err, "failed to delete lock");
                failed.push((candidate.file_name, err.to_string()));
            }
        }
    }
    PruneOutcome::Applied { deleted, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProcessOutput;
    use crate::io::process::SystemRunner;
    use crate::test_support::{SpyRunner, TestRepo, write_lock};

    fn request(root: &Path, apply: bool) -> PruneRequest {
        PruneRequest {
            lock_dir: root.join("Lock"),
            age_days: 30.0,
            apply,
            worktree_mutex: MutexLocation::Disabled,
        }
    }

    #[test]
    fn old_released_lock_is_a_candidate() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_lock(temp.path(), "LOCKED-old.md", "owner: a\nstatus: RELEASED\n\n", 31);
        write_lock(temp.path(), "LOCKED-young.md", "owner: a\nstatus: released\n\n", 2);
        write_lock(temp.path(), "LOCKED-bare.md", "owner: a\n\nstill working\n", 90);
        write_lock(temp.path(), "LOCKED-marker.md", "owner: a\n\nLOCK UNLOCKED\n", 90);

        let candidates =
            find_stale_released(&temp.path().join("Lock"), 30.0, SystemTime::now())
                .expect("scan");
        let names: Vec<&str> = candidates.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["LOCKED-marker.md", "LOCKED-old.md"]);
        assert!(candidates[1].age_days >= 31.0);
    }

    #[test]
    fn active_status_vetoes_marker_in_body() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_lock(
            temp.path(),
            "LOCKED-x.md",
            "owner: a\nstatus: active\n\nwill be released next week\n",
            90,
        );
        let candidates =
            find_stale_released(&temp.path().join("Lock"), 30.0, SystemTime::now())
                .expect("scan");
        assert!(candidates.is_empty());
    }

    #[test]
    fn qualified_release_status_is_not_pruned() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_lock(temp.path(), "LOCKED-not.md", "status: not released\n\n", 90);
        write_lock(
            temp.path(),
            "LOCKED-until.md",
            "status: active until released\n\n",
            90,
        );
        write_lock(
            temp.path(),
            "LOCKED-review.md",
            "status: active, unlocked after review\n\nLOCK UNLOCKED soon\n",
            90,
        );
        let candidates =
            find_stale_released(&temp.path().join("Lock"), 30.0, SystemTime::now())
                .expect("scan");
        assert!(candidates.is_empty(), "{candidates:?}");
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_lock(temp.path(), "LOCKED-old.md", "status: released\n\n", 40);
        let runner = SpyRunner::new();

        let outcome =
            prune(temp.path(), &runner, &request(temp.path(), false), SystemTime::now())
                .expect("prune");
        assert!(matches!(outcome, PruneOutcome::DryRun { ref candidates } if candidates.len() == 1));
        assert!(path.exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_lock_dir_is_nothing_to_do() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcome = prune(
            temp.path(),
            &SpyRunner::new(),
            &request(temp.path(), false),
            SystemTime::now(),
        )
        .expect("prune");
        assert_eq!(outcome, PruneOutcome::NothingToDo);
    }

    #[test]
    fn dirty_tree_blocks_every_deletion() {
        let repo = TestRepo::new();
        let released = write_lock(repo.root(), "LOCKED-old.md", "status: released\n\n", 40);
        repo.commit_all("add lock");
        repo.write("src/wip.rs", "// uncommitted\n");

        let err = prune(
            repo.root(),
            &SystemRunner::default(),
            &request(repo.root(), true),
            SystemTime::now(),
        )
        .expect_err("dirty");
        match err {
            GateError::DirtyTree { entries } => {
                assert!(entries.iter().any(|entry| entry.ends_with("src/wip.rs")));
            }
            other => panic!("expected dirty tree, got {other:?}"),
        }
        assert!(released.exists());
    }

    #[test]
    fn clean_tree_apply_deletes_candidates() {
        let repo = TestRepo::new();
        let old = write_lock(repo.root(), "LOCKED-old.md", "status: released\n\n", 40);
        let active = write_lock(repo.root(), "LOCKED-live.md", "status: active\n\n", 40);
        repo.commit_all("add locks");

        let outcome = prune(
            repo.root(),
            &SystemRunner::default(),
            &request(repo.root(), true),
            SystemTime::now(),
        )
        .expect("prune");
        assert_eq!(
            outcome,
            PruneOutcome::Applied {
                deleted: vec!["LOCKED-old.md".to_string()],
                failed: Vec::new(),
            }
        );
        assert!(!old.exists());
        assert!(active.exists());
    }

    #[test]
    fn failed_deletion_does_not_stop_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let present = write_lock(temp.path(), "LOCKED-present.md", "status: released\n\n", 40);
        let candidates = vec![
            PruneCandidate {
                file_name: "LOCKED-gone.md".to_string(),
                path: temp.path().join("Lock/LOCKED-gone.md"),
                age_days: 40.0,
            },
            PruneCandidate {
                file_name: "LOCKED-present.md".to_string(),
                path: present.clone(),
                age_days: 40.0,
            },
        ];

        match delete_candidates(candidates) {
            PruneOutcome::Applied { deleted, failed } => {
                assert_eq!(deleted, vec!["LOCKED-present.md"]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, "LOCKED-gone.md");
                assert!(!failed[0].1.is_empty());
            }
            other => panic!("expected applied, got {other:?}"),
        }
        assert!(!present.exists());
    }

    #[test]
    fn unreadable_lock_dir_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let not_a_dir = temp.path().join("Lock");
        fs::write(&not_a_dir, "a file where the lock directory should be\n").expect("write");

        let err = find_stale_released(&not_a_dir, 30.0, SystemTime::now()).expect_err("not a dir");
        assert!(
            matches!(err, GateError::Io { context: "read lock directory", .. }),
            "{err:?}"
        );
        assert_eq!(crate::exit_codes::for_prune_error(&err), crate::exit_codes::UNEXPECTED);
    }

    #[test]
    fn apply_respects_held_worktree_mutex() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mutex_path = temp.path().join("lockgate.lock");
        let _held = WorktreeMutex::acquire(&mutex_path, "pr").expect("hold");
        let runner = SpyRunner::new().respond("git status", ProcessOutput::ok(""));

        let err = prune(
            temp.path(),
            &runner,
            &PruneRequest {
                worktree_mutex: MutexLocation::Path(mutex_path),
                ..request(temp.path(), true)
            },
            SystemTime::now(),
        )
        .expect_err("held");
        assert!(matches!(err, GateError::Conflict { .. }));
        assert!(runner.calls().is_empty());
    }
}
