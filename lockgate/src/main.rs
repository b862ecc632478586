//! lockgate: advisory lock registry and lock-gated PR automation.
//!
//! Reads claims from `Lock/LOCKED-*.md` at the repository root. See
//! `lockgate --help` for the commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use lockgate::core::header::parse_assignment;
use lockgate::core::pipeline::Terminal;
use lockgate::core::record::is_lock_file_name;
use lockgate::error::GateError;
use lockgate::exit_codes;
use lockgate::guard::{ChangeSource, guard};
use lockgate::io::config::{CONFIG_FILE_NAME, LockgateConfig, load_config};
use lockgate::io::lock_service::{LockClaim, LockService, lock_service};
use lockgate::io::process::SystemRunner;
use lockgate::logging;
use lockgate::pipeline::{PipelineRequest, run_pipeline};
use lockgate::prune::{PruneOutcome, PruneRequest, prune};
use lockgate::restore::{RestoreOutcome, RestoreRequest, RestoreSource, restore};
use lockgate::status::{StatusFilter, collect_status, render_table};
use lockgate::unlock::{UnlockOutcome, UnlockRequest, unlock_stale};

#[derive(Parser)]
#[command(
    name = "lockgate",
    version,
    about = "Advisory lock registry and lock-gated PR automation"
)]
struct Cli {
    /// Repository root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/lockgate.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge header fields into an existing lock file.
    Annotate {
        /// Lock file name (e.g. `LOCKED-db-migration.md`).
        #[arg(long)]
        file: String,
        /// Header field to set, as `key=value`. Repeatable.
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, String)>,
        /// Single-line note stored in the `note:` field.
        #[arg(long)]
        note: Option<String>,
    },
    /// Find (and with --apply, delete) stale released locks.
    Prune {
        /// Minimum age in days (default from config).
        #[arg(long)]
        age: Option<f64>,
        /// Delete candidates instead of reporting them.
        #[arg(long)]
        apply: bool,
    },
    /// Reject change sets that touch protected paths.
    Guard {
        /// Compare `git diff <ref> HEAD` instead of the staged index.
        #[arg(long, env = "LOCKGATE_BASE_REF")]
        base_ref: Option<String>,
    },
    /// Validate, commit, push and open a PR when no lock is active.
    Pr {
        /// Branch to create (default `chore/auto/<timestamp>`).
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        title: String,
        /// Validation command run through `sh -c` (default from config).
        #[arg(long)]
        test: Option<String>,
        /// Read the PR body from a file.
        #[arg(long, conflicts_with = "body")]
        body_file: Option<PathBuf>,
        #[arg(long)]
        body: Option<String>,
        /// Commit message (default: the title).
        #[arg(long)]
        commit_msg: Option<String>,
        /// PR base branch (default from config).
        #[arg(long)]
        base: Option<String>,
    },
    /// Summarize lock files.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
        /// Only locks at least this many days old.
        #[arg(long)]
        age: Option<f64>,
        /// Only locks with this owner.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Claim a slug by creating `LOCKED-<slug>.md`.
    Acquire {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        note: Option<String>,
        /// Expiry date recorded in the `expires:` field.
        #[arg(long)]
        expires: Option<String>,
    },
    /// Mark a lock released.
    Release {
        /// Lock file name.
        #[arg(long)]
        file: String,
        /// Who released it.
        #[arg(long, env = "USER", default_value = "unknown")]
        by: String,
    },
    /// Release blocking locks claimed longer ago than a threshold.
    UnlockStale {
        /// Threshold in hours (default from config).
        #[arg(long)]
        hours: Option<f64>,
        /// Identity recorded as the releaser; required unless --dry.
        #[arg(long, env = "UNLOCK_AGENT_NAME")]
        agent: Option<String>,
        /// Model recorded alongside the agent.
        #[arg(long, env = "UNLOCK_AGENT_MODEL")]
        model: Option<String>,
        /// Report stale locks without releasing them.
        #[arg(long)]
        dry: bool,
    },
    /// Restore lock files deleted from the tree but present in git history.
    Restore {
        /// Write files instead of reporting them.
        #[arg(long)]
        apply: bool,
        /// Document listing lock files to recreate as placeholders when git
        /// has no copy.
        #[arg(long)]
        audit_doc: Option<PathBuf>,
        /// Who restored them.
        #[arg(long, env = "USER", default_value = "unknown")]
        by: String,
    },
}

/// Repository root plus loaded configuration.
struct Workspace {
    root: PathBuf,
    config: LockgateConfig,
}

impl Workspace {
    fn load(root: &Path, config: Option<&Path>) -> Result<Self> {
        let config_path = config
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
        let config = load_config(&config_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    fn locks(&self) -> Box<dyn LockService> {
        lock_service(self.config.locks.backend, self.config.lock_dir(&self.root))
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("lockgate: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let workspace = Workspace::load(&cli.root, cli.config.as_deref());
    match cli.command {
        Command::Annotate { file, set, note } => {
            cmd_annotate(&workspace?, &file, &set, note.as_deref())
        }
        Command::Prune { age, apply } => match workspace {
            Ok(workspace) => Ok(cmd_prune(&workspace, age, apply)),
            Err(err) => {
                eprintln!("lockgate: {err:#}");
                Ok(exit_codes::UNEXPECTED)
            }
        },
        Command::Guard { base_ref } => Ok(cmd_guard(&workspace?, base_ref)),
        Command::Pr {
            branch,
            title,
            test,
            body_file,
            body,
            commit_msg,
            base,
        } => {
            let workspace = workspace?;
            let body = match body_file {
                Some(path) => Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("read {}", path.display()))?,
                ),
                None => body,
            };
            let pipeline = &workspace.config.pipeline;
            let request = PipelineRequest {
                branch,
                title,
                validation_command: test
                    .or_else(|| pipeline.validate_command.clone())
                    .unwrap_or_default(),
                commit_message: commit_msg,
                body,
                remote: pipeline.remote.clone(),
                base: base.or_else(|| pipeline.base.clone()),
                pr_command: pipeline.pr_command.clone(),
                worktree_mutex: workspace.config.worktree_mutex(&workspace.root),
            };
            Ok(cmd_pr(&workspace, &request))
        }
        Command::Status { json, age, owner } => cmd_status(
            &workspace?,
            json,
            &StatusFilter {
                min_age_days: age,
                owner,
            },
        ),
        Command::Acquire {
            slug,
            owner,
            note,
            expires,
        } => {
            let claim = LockClaim {
                slug,
                owner,
                note,
                expires,
            };
            Ok(cmd_acquire(&workspace?, &claim))
        }
        Command::Release { file, by } => cmd_release(&workspace?, &file, &by),
        Command::UnlockStale {
            hours,
            agent,
            model,
            dry,
        } => {
            let workspace = workspace?;
            let request = UnlockRequest {
                stale_hours: hours.unwrap_or(workspace.config.unlock.stale_hours),
                agent,
                model,
                dry_run: dry,
                worktree_mutex: workspace.config.worktree_mutex(&workspace.root),
            };
            Ok(cmd_unlock_stale(&workspace, &request))
        }
        Command::Restore {
            apply,
            audit_doc,
            by,
        } => match workspace {
            Ok(workspace) => {
                let request = RestoreRequest {
                    lock_dir: workspace.config.lock_dir.clone(),
                    apply,
                    audit_doc: audit_doc.map(|doc| workspace.root.join(doc)),
                    restored_by: by,
                    worktree_mutex: workspace.config.worktree_mutex(&workspace.root),
                };
                Ok(cmd_restore(&workspace, &request))
            }
            Err(err) => {
                eprintln!("lockgate: {err:#}");
                Ok(exit_codes::UNEXPECTED)
            }
        },
    }
}

fn cmd_annotate(
    workspace: &Workspace,
    file: &str,
    updates: &[(String, String)],
    note: Option<&str>,
) -> Result<i32> {
    if updates.is_empty() && note.is_none() {
        return fail(
            &GateError::Config("nothing to annotate: pass --set and/or --note".to_string()),
            exit_codes::FAILURE,
        );
    }
    let name = match lock_file_arg(file) {
        Ok(name) => name,
        Err(err) => return fail(&err, exit_codes::FAILURE),
    };
    match workspace.locks().annotate(&name, updates, note) {
        Ok(true) => println!("annotated {name}"),
        Ok(false) => println!("{name} already up to date"),
        Err(err) => return fail(&err, exit_codes::for_lock_error(&err)),
    }
    Ok(exit_codes::OK)
}

fn cmd_prune(workspace: &Workspace, age: Option<f64>, apply: bool) -> i32 {
    let age_days = age.unwrap_or(workspace.config.prune.age_days);
    let request = PruneRequest {
        lock_dir: workspace.config.lock_dir(&workspace.root),
        age_days,
        apply,
        worktree_mutex: workspace.config.worktree_mutex(&workspace.root),
    };
    let outcome = match prune(
        &workspace.root,
        &SystemRunner::default(),
        &request,
        SystemTime::now(),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            if matches!(err, GateError::DirtyTree { .. }) {
                eprintln!("lockgate: refusing to delete locks");
            }
            eprintln!("lockgate: {err}");
            return exit_codes::for_prune_error(&err);
        }
    };

    match outcome {
        PruneOutcome::NothingToDo => {
            println!("no released locks older than {age_days} days found");
            exit_codes::OK
        }
        PruneOutcome::DryRun { candidates } => {
            println!(
                "found {} candidate(s) older than {age_days} days:",
                candidates.len()
            );
            for candidate in &candidates {
                println!("  - {}  (~{}d)", candidate.file_name, candidate.age_days);
            }
            println!("\nDRY-RUN (no files deleted). Re-run with --apply to remove these files.");
            exit_codes::DRY_RUN
        }
        PruneOutcome::Applied { deleted, failed } => {
            for name in &deleted {
                println!("deleted {name}");
            }
            for (name, err) in &failed {
                eprintln!("lockgate: failed to delete {name}: {err}");
            }
            println!("deletion complete; open a PR to record the removals");
            exit_codes::OK
        }
    }
}

fn cmd_guard(workspace: &Workspace, base_ref: Option<String>) -> i32 {
    let source = match base_ref.filter(|value| !value.trim().is_empty()) {
        Some(base_ref) => ChangeSource::Diff { base_ref },
        None => ChangeSource::Staged,
    };
    match guard(
        &workspace.root,
        &SystemRunner::default(),
        &source,
        &workspace.config.guard.protected_prefixes,
    ) {
        Ok(_) => exit_codes::OK,
        Err(err) => {
            eprintln!("lockgate: {err}");
            if matches!(err, GateError::PolicyViolation { .. }) {
                eprintln!("Protected paths change only through the lock lifecycle.");
            }
            exit_codes::for_guard_error(&err)
        }
    }
}

fn cmd_pr(workspace: &Workspace, request: &PipelineRequest) -> i32 {
    let locks = workspace.locks();
    match run_pipeline(
        &workspace.root,
        locks.as_ref(),
        &SystemRunner::default(),
        request,
        Utc::now(),
    ) {
        Ok(outcome) => {
            match outcome.terminal {
                Terminal::NothingToCommit => {
                    println!("validation passed; nothing to commit on {}", outcome.branch);
                }
                Terminal::Done => match &outcome.pr_url {
                    Some(url) => println!("PR created: {url}"),
                    None => println!("PR created for {}", outcome.branch),
                },
            }
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("lockgate: {err}");
            exit_codes::for_pipeline_error(&err)
        }
    }
}

fn cmd_status(workspace: &Workspace, json: bool, filter: &StatusFilter) -> Result<i32> {
    let entries = match collect_status(
        &workspace.config.lock_dir(&workspace.root),
        filter,
        SystemTime::now(),
    ) {
        Ok(entries) => entries,
        Err(err) => return fail(&err, exit_codes::FAILURE),
    };
    if json {
        let payload = serde_json::to_string_pretty(&entries).context("serialize status")?;
        println!("{payload}");
    } else {
        print!("{}", render_table(&entries));
    }
    Ok(exit_codes::OK)
}

fn cmd_acquire(workspace: &Workspace, claim: &LockClaim) -> i32 {
    match workspace.locks().acquire(claim, Utc::now()) {
        Ok(path) => {
            println!("acquired {}", path.display());
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("lockgate: {err}");
            exit_codes::for_lock_error(&err)
        }
    }
}

fn cmd_release(workspace: &Workspace, file: &str, by: &str) -> Result<i32> {
    let name = match lock_file_arg(file) {
        Ok(name) => name,
        Err(err) => return fail(&err, exit_codes::FAILURE),
    };
    match workspace.locks().release(&name, by, Utc::now()) {
        Ok(_) => {
            println!("released {name}");
            Ok(exit_codes::OK)
        }
        Err(err) => fail(&err, exit_codes::for_lock_error(&err)),
    }
}

fn cmd_unlock_stale(workspace: &Workspace, request: &UnlockRequest) -> i32 {
    let locks = workspace.locks();
    let outcome = match unlock_stale(
        &workspace.root,
        locks.as_ref(),
        &SystemRunner::default(),
        request,
        Utc::now(),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("lockgate: {err}");
            return exit_codes::for_lock_error(&err);
        }
    };
    match outcome {
        UnlockOutcome::NothingToDo => {
            println!("no blocking locks older than {}h", request.stale_hours);
        }
        UnlockOutcome::DryRun { stale } => {
            println!("{} stale lock(s) older than {}h:", stale.len(), request.stale_hours);
            for lock in &stale {
                println!("  - {}  ({}h)", lock.file_name, lock.age_hours);
            }
            println!("\nDRY-RUN (nothing released). Re-run without --dry to release them.");
        }
        UnlockOutcome::Released { released } => {
            for name in &released {
                println!("released -> {name}");
            }
        }
    }
    exit_codes::OK
}

fn cmd_restore(workspace: &Workspace, request: &RestoreRequest) -> i32 {
    let outcome = match restore(
        &workspace.root,
        &SystemRunner::default(),
        request,
        Utc::now(),
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("lockgate: {err}");
            return exit_codes::for_restore_error(&err);
        }
    };
    match outcome {
        RestoreOutcome::NothingToDo => {
            println!("nothing to restore (no missing lock files found)");
            exit_codes::OK
        }
        RestoreOutcome::DryRun { plan } => {
            println!("{} lock file(s) to restore:", plan.len());
            for item in &plan {
                match &item.source {
                    RestoreSource::History { revision } => {
                        let short = revision.get(..12).unwrap_or(revision.as_str());
                        println!("  - {} @ {short}", item.file_name);
                    }
                    RestoreSource::Placeholder { listed_in } => {
                        println!("  - {} (placeholder, listed in {listed_in})", item.file_name);
                    }
                }
            }
            println!("\nDRY-RUN (no files written). Re-run with --apply to restore them.");
            exit_codes::DRY_RUN
        }
        RestoreOutcome::Applied { written, skipped } => {
            for name in &written {
                println!("restored {name}");
            }
            for name in &skipped {
                println!("skipped {name} (exists)");
            }
            println!("restore complete; commit the Lock/ files in a PR");
            exit_codes::OK
        }
    }
}

/// Accept `LOCKED-x.md` or a path ending in it; return the bare file name.
fn lock_file_arg(arg: &str) -> Result<String, GateError> {
    let name = Path::new(arg)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !is_lock_file_name(&name) {
        return Err(GateError::Config(format!(
            "'{arg}' is not a lock file name (expected LOCKED-<slug>.md)"
        )));
    }
    Ok(name)
}

fn fail(err: &GateError, code: i32) -> Result<i32> {
    eprintln!("lockgate: {err}");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_annotate_with_repeated_set() {
        let cli = Cli::parse_from([
            "lockgate",
            "annotate",
            "--file",
            "LOCKED-db.md",
            "--set",
            "status=released",
            "--set",
            "related-pr=#12",
            "--note",
            "done",
        ]);
        match cli.command {
            Command::Annotate { file, set, note } => {
                assert_eq!(file, "LOCKED-db.md");
                assert_eq!(
                    set,
                    vec![
                        ("status".to_string(), "released".to_string()),
                        ("related-pr".to_string(), "#12".to_string()),
                    ]
                );
                assert_eq!(note.as_deref(), Some("done"));
            }
            _ => panic!("expected annotate"),
        }
    }

    #[test]
    fn parse_rejects_malformed_assignment() {
        let result = Cli::try_parse_from([
            "lockgate",
            "annotate",
            "--file",
            "LOCKED-db.md",
            "--set",
            "no-equals-sign",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_prune_defaults_to_dry_run() {
        let cli = Cli::parse_from(["lockgate", "prune", "--age", "7"]);
        assert!(matches!(
            cli.command,
            Command::Prune {
                age: Some(_),
                apply: false
            }
        ));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_pr_rejects_body_and_body_file() {
        let result = Cli::try_parse_from([
            "lockgate",
            "pr",
            "--title",
            "t",
            "--body",
            "b",
            "--body-file",
            "b.md",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_unlock_stale_and_restore() {
        let cli = Cli::parse_from([
            "lockgate",
            "unlock-stale",
            "--hours",
            "48",
            "--agent",
            "bot",
            "--dry",
        ]);
        match cli.command {
            Command::UnlockStale {
                hours, agent, dry, ..
            } => {
                assert_eq!(hours, Some(48.0));
                assert_eq!(agent.as_deref(), Some("bot"));
                assert!(dry);
            }
            _ => panic!("expected unlock-stale"),
        }

        let cli = Cli::parse_from(["lockgate", "restore", "--audit-doc", "docs/cleanup.md"]);
        match cli.command {
            Command::Restore {
                apply, audit_doc, ..
            } => {
                assert!(!apply);
                assert_eq!(audit_doc, Some(PathBuf::from("docs/cleanup.md")));
            }
            _ => panic!("expected restore"),
        }
    }

    #[test]
    fn lock_file_arg_accepts_paths() {
        assert_eq!(
            lock_file_arg("Lock/LOCKED-db.md").expect("path"),
            "LOCKED-db.md"
        );
        assert!(lock_file_arg("README.md").is_err());
    }
}
