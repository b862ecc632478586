//! Recovery of lock files that were deleted but still exist in git history.
//!
//! Dry run by default. Every lock file ever committed under the lock directory
//! that is missing from disk is restored from the newest commit containing
//! it, with `restored-*` fields merged into its header. Locks named in an
//! audit document but never committed are recreated as blocking placeholders.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::header::{Document, validate_field};
use crate::core::record::{is_lock_file_name, lock_id};
use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::lock_store::write_atomic;
use crate::io::mutex::{MutexLocation, WorktreeMutex};
use crate::io::process::ProcessRunner;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Lock directory as configured, relative to the repository root.
    pub lock_dir: String,
    pub apply: bool,
    /// Document listing lock files (`<lock dir>/LOCKED-*.md`) to recreate
    /// when git has no copy.
    pub audit_doc: Option<PathBuf>,
    pub restored_by: String,
    pub worktree_mutex: MutexLocation,
}

/// Where a restored file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    History { revision: String },
    Placeholder { listed_in: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreItem {
    pub file_name: String,
    pub source: RestoreSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    NothingToDo,
    DryRun { plan: Vec<RestoreItem> },
    /// `skipped` holds files that appeared on disk after planning.
    Applied {
        written: Vec<String>,
        skipped: Vec<String>,
    },
}

/// Lock files that are missing on disk and can be restored.
#[instrument(skip_all, fields(lock_dir = %request.lock_dir))]
pub fn plan_restore<R: ProcessRunner + ?Sized>(
    root: &Path,
    git: &Git<'_, R>,
    request: &RestoreRequest,
) -> GateResult<Vec<RestoreItem>> {
    let rel_dir = request.lock_dir.trim_end_matches('/');
    let history: BTreeSet<String> = git
        .history_paths(rel_dir)?
        .iter()
        .filter_map(|path| direct_child(path, rel_dir))
        .collect();
    let listed = match &request.audit_doc {
        Some(doc) => listed_in_doc(doc, rel_dir)?,
        None => BTreeSet::new(),
    };

    let lock_dir = root.join(rel_dir);
    let mut plan = Vec::new();
    for name in history.union(&listed) {
        if lock_dir.join(name).exists() {
            continue;
        }
        let source = match git.last_revision_with(&format!("{rel_dir}/{name}"))? {
            Some(revision) => RestoreSource::History { revision },
            None => match &request.audit_doc {
                Some(doc) if listed.contains(name) => RestoreSource::Placeholder {
                    listed_in: doc.display().to_string(),
                },
                _ => continue,
            },
        };
        debug!(file = %name, source = ?source, "restore candidate");
        plan.push(RestoreItem {
            file_name: name.clone(),
            source,
        });
    }
    Ok(plan)
}

/// Plan and, when `request.apply` is set, write the restored files.
///
/// Files never overwrite something already on disk.
#[instrument(skip_all, fields(apply = request.apply))]
pub fn restore<R: ProcessRunner + ?Sized>(
    root: &Path,
    runner: &R,
    request: &RestoreRequest,
    now: DateTime<Utc>,
) -> GateResult<RestoreOutcome> {
    validate_field("restored-by", &request.restored_by).map_err(GateError::Config)?;
    let git = Git::new(root, runner);
    let plan = plan_restore(root, &git, request)?;
    if plan.is_empty() {
        return Ok(RestoreOutcome::NothingToDo);
    }
    if !request.apply {
        return Ok(RestoreOutcome::DryRun { plan });
    }

    let _mutex = WorktreeMutex::acquire_at(&request.worktree_mutex, &git, "restore")?;
    let rel_dir = request.lock_dir.trim_end_matches('/');
    let lock_dir = root.join(rel_dir);
    fs::create_dir_all(&lock_dir)
        .map_err(|err| GateError::io("create lock directory", &lock_dir, err))?;

    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut written = Vec::new();
    let mut skipped = Vec::new();
    for item in plan {
        let target = lock_dir.join(&item.file_name);
        if target.exists() {
            warn!(file = %item.file_name, "appeared on disk, not restoring");
            skipped.push(item.file_name);
            continue;
        }
        let contents = match &item.source {
            RestoreSource::History { revision } => {
                let original = git.show_file(revision, &format!("{rel_dir}/{}", item.file_name))?;
                let mut document = Document::parse(&original);
                document.set("restored-at", &stamp);
                document.set("restored-from", revision);
                document.set("restored-by", &request.restored_by);
                document.render()
            }
            RestoreSource::Placeholder { listed_in } => {
                placeholder(&item.file_name, listed_in, &request.restored_by, &stamp)
            }
        };
        write_atomic(&target, &contents)?;
        info!(file = %item.file_name, "restored lock file");
        written.push(item.file_name);
    }
    Ok(RestoreOutcome::Applied { written, skipped })
}

/// `LOCKED-x.md` when `path` is `<rel_dir>/LOCKED-x.md`.
fn direct_child(path: &str, rel_dir: &str) -> Option<String> {
    let name = path.strip_prefix(rel_dir)?.strip_prefix('/')?;
    (!name.contains('/') && is_lock_file_name(name)).then(|| name.to_string())
}

fn listed_in_doc(doc: &Path, rel_dir: &str) -> GateResult<BTreeSet<String>> {
    let text =
        fs::read_to_string(doc).map_err(|err| GateError::io("read audit document", doc, err))?;
    let pattern = format!(r"{}/(LOCKED-[A-Za-z0-9_.+-]+\.md)", regex::escape(rel_dir));
    let mention = Regex::new(&pattern)
        .map_err(|err| GateError::Config(format!("lock directory pattern: {err}")))?;
    Ok(mention
        .captures_iter(&text)
        .map(|caps| caps[1].to_string())
        .filter(|name| is_lock_file_name(name))
        .collect())
}

/// A blocking stand-in for a lock that has no committed copy.
fn placeholder(file_name: &str, listed_in: &str, restored_by: &str, stamp: &str) -> String {
    let id = lock_id(file_name).unwrap_or(file_name);
    format!(
        "restored-at: {stamp}\nrestored-from: {listed_in}\nrestored-by: {restored_by}\n\
         note: placeholder, no committed history\n\n# Lock: {id}\n\n\
         Recreated because {listed_in} lists this lock and git has no copy of it.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::LockStatus;
    use crate::io::lock_store::parse_record;
    use crate::io::process::SystemRunner;
    use crate::test_support::TestRepo;

    fn request(apply: bool) -> RestoreRequest {
        RestoreRequest {
            lock_dir: "Lock".to_string(),
            apply,
            audit_doc: None,
            restored_by: "ops".to_string(),
            worktree_mutex: MutexLocation::Disabled,
        }
    }

    /// Commit two locks, then delete one of them in a later commit.
    fn repo_with_deleted_lock() -> TestRepo {
        let repo = TestRepo::new();
        repo.write(
            "Lock/LOCKED-db.md",
            "owner: @alice\nstatus: released\n\n# Lock: db\n",
        );
        repo.write("Lock/LOCKED-ui.md", "owner: @bob\nstatus: active\n\n");
        repo.commit_all("claim");
        repo.git(&["rm", "--quiet", "Lock/LOCKED-db.md"]);
        repo.git(&["commit", "--quiet", "-m", "prune db"]);
        repo
    }

    #[test]
    fn direct_child_keeps_only_lock_files_in_the_dir() {
        assert_eq!(
            direct_child("Lock/LOCKED-a.md", "Lock").as_deref(),
            Some("LOCKED-a.md")
        );
        assert_eq!(direct_child("Lock/released/RELEASED-LOCKED-a.md", "Lock"), None);
        assert_eq!(direct_child("Lock/unlock-log.json", "Lock"), None);
        assert_eq!(direct_child("Locks/LOCKED-a.md", "Lock"), None);
    }

    #[test]
    fn dry_run_plans_deleted_lock_from_history() {
        let repo = repo_with_deleted_lock();
        let outcome = restore(
            repo.root(),
            &SystemRunner::default(),
            &request(false),
            Utc::now(),
        )
        .expect("restore");

        let RestoreOutcome::DryRun { plan } = outcome else {
            panic!("expected dry run, got {outcome:?}");
        };
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].file_name, "LOCKED-db.md");
        let RestoreSource::History { revision } = &plan[0].source else {
            panic!("expected history source");
        };
        assert_eq!(revision, &repo.git(&["rev-parse", "HEAD~1"]));
        assert!(!repo.root().join("Lock/LOCKED-db.md").exists());
    }

    #[test]
    fn apply_restores_content_and_keeps_status() {
        let repo = repo_with_deleted_lock();
        let outcome = restore(
            repo.root(),
            &SystemRunner::default(),
            &request(true),
            Utc::now(),
        )
        .expect("restore");
        assert_eq!(
            outcome,
            RestoreOutcome::Applied {
                written: vec!["LOCKED-db.md".to_string()],
                skipped: Vec::new(),
            }
        );

        let path = repo.root().join("Lock/LOCKED-db.md");
        let record = parse_record(&path).expect("parse");
        assert_eq!(record.status, LockStatus::Released);
        assert_eq!(record.owner.as_deref(), Some("@alice"));
        assert_eq!(record.document.get("restored-by"), Some("ops"));
        assert!(record.document.get("restored-from").is_some());
        assert!(record.document.body().contains("# Lock: db"));
    }

    #[test]
    fn nothing_missing_is_nothing_to_do() {
        let repo = TestRepo::new();
        repo.write("Lock/LOCKED-ui.md", "owner: @bob\n\n");
        repo.commit_all("claim");
        let outcome = restore(
            repo.root(),
            &SystemRunner::default(),
            &request(false),
            Utc::now(),
        )
        .expect("restore");
        assert_eq!(outcome, RestoreOutcome::NothingToDo);
    }

    #[test]
    fn audit_doc_names_without_history_become_placeholders() {
        let repo = repo_with_deleted_lock();
        let doc = repo.write(
            "docs/cleanup.md",
            "Removed during cleanup:\n- Lock/LOCKED-db.md\n- Lock/LOCKED-ghost.md\n",
        );
        let req = RestoreRequest {
            audit_doc: Some(doc),
            ..request(true)
        };

        let outcome =
            restore(repo.root(), &SystemRunner::default(), &req, Utc::now()).expect("restore");
        let RestoreOutcome::Applied { written, .. } = outcome else {
            panic!("expected applied, got {outcome:?}");
        };
        assert_eq!(written, vec!["LOCKED-db.md", "LOCKED-ghost.md"]);

        let ghost = parse_record(&repo.root().join("Lock/LOCKED-ghost.md")).expect("parse");
        assert!(ghost.is_blocking());
        assert!(
            ghost
                .document
                .get("restored-from")
                .is_some_and(|value| value.ends_with("cleanup.md"))
        );
    }

    #[test]
    fn missing_audit_doc_is_io_error() {
        let repo = TestRepo::new();
        let req = RestoreRequest {
            audit_doc: Some(repo.root().join("docs/none.md")),
            ..request(false)
        };
        let err = restore(repo.root(), &SystemRunner::default(), &req, Utc::now())
            .expect_err("missing doc");
        assert!(matches!(err, GateError::Io { .. }));
    }
}
