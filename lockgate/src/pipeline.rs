//! Driver for the automated PR pipeline.
//!
//! Performs the I/O for each stage and hands the observed result to the pure
//! transitions in [`crate::core::pipeline`]. Stages run strictly in order and
//! the first failure aborts the run; nothing is rolled back, so a failed PR
//! creation leaves the branch pushed.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::pipeline::{
    Stage, Terminal, Transition, after_lock_check, after_tool, after_validate, commit_decision,
};
use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::lock_service::LockService;
use crate::io::mutex::{MutexLocation, WorktreeMutex};
use crate::io::process::{CommandSpec, ProcessRunner};

/// Inputs for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Branch to create; `chore/auto/<timestamp>` when unset.
    pub branch: Option<String>,
    pub title: String,
    /// Shell command gating the run.
    pub validation_command: String,
    /// Defaults to the title.
    pub commit_message: Option<String>,
    /// Defaults to a summary listing the staged files.
    pub body: Option<String>,
    pub remote: String,
    pub base: Option<String>,
    /// PR tool invocation, e.g. `["gh", "pr", "create"]`.
    pub pr_command: Vec<String>,
    pub worktree_mutex: MutexLocation,
}

/// Result of a run that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub branch: String,
    pub terminal: Terminal,
    /// Stages that completed, in order.
    pub completed: Vec<Stage>,
    /// Last non-empty stdout line of the PR tool (usually the PR URL).
    pub pr_url: Option<String>,
}

/// `chore/auto/<UTC %Y%m%d%H%M%S>`.
pub fn default_branch_name(now: DateTime<Utc>) -> String {
    format!("chore/auto/{}", now.format("%Y%m%d%H%M%S"))
}

/// PR body listing the files that went into the commit.
pub fn default_body(staged: &[String]) -> String {
    let mut body = String::from("Automated PR opened after the validation command passed.\n\n");
    body.push_str("Changed files:\n");
    for path in staged {
        body.push_str(&format!(" - {path}\n"));
    }
    body
}

/// Run every stage from `LockCheck` to `CreatePr`.
///
/// The lock check reads a snapshot of `Lock/`; a claim created after it is not
/// seen. The worktree mutex, when configured, is held until this returns.
#[instrument(skip_all, fields(title = %request.title))]
pub fn run_pipeline<L, R>(
    root: &Path,
    locks: &L,
    runner: &R,
    request: &PipelineRequest,
    now: DateTime<Utc>,
) -> GateResult<PipelineOutcome>
where
    L: LockService + ?Sized,
    R: ProcessRunner + ?Sized,
{
    if request.validation_command.trim().is_empty() {
        return Err(GateError::Config(
            "no validation command: pass --test or set pipeline.validate_command".to_string(),
        ));
    }
    let Some((pr_program, pr_args)) = request.pr_command.split_first() else {
        return Err(GateError::Config("pipeline.pr_command is empty".to_string()));
    };

    let git = Git::new(root, runner);
    let _mutex = WorktreeMutex::acquire_at(&request.worktree_mutex, &git, "pr")?;
    let branch = request
        .branch
        .clone()
        .unwrap_or_else(|| default_branch_name(now));
    info!(branch = %branch, "pipeline started");

    let run_tool = |stage: Stage, spec: CommandSpec| -> GateResult<Transition> {
        let output = runner.run(&spec)?;
        Ok(after_tool(stage, &spec.display(), &output))
    };

    let mut stage = Stage::Start;
    let mut completed = Vec::new();
    let mut staged: Vec<String> = Vec::new();
    let mut pr_url = None;

    loop {
        debug!(stage = %stage, "entering stage");
        let transition = match stage {
            Stage::Start => Transition::Next(Stage::LockCheck),
            Stage::LockCheck => after_lock_check(&locks.records()?),
            Stage::Validate => {
                let spec = CommandSpec::shell(&request.validation_command, root).passthrough();
                after_validate(&runner.run(&spec)?)
            }
            Stage::Branch => run_tool(stage, git.spec(&["checkout", "-b", &branch]))?,
            Stage::StageChanges => run_tool(stage, git.spec(&["add", "--update"]))?,
            Stage::Commit => {
                staged = git.staged_paths()?;
                match commit_decision(&staged) {
                    Some(transition) => transition,
                    None => {
                        let message = request.commit_message.as_deref().unwrap_or(&request.title);
                        run_tool(stage, git.spec(&["commit", "-m", message]))?
                    }
                }
            }
            Stage::Push => run_tool(
                stage,
                git.spec(&["push", "--set-upstream", &request.remote, &branch]),
            )?,
            Stage::CreatePr => {
                let body = request
                    .body
                    .clone()
                    .unwrap_or_else(|| default_body(&staged));
                let mut args: Vec<String> = pr_args.to_vec();
                args.extend([
                    "--title".to_string(),
                    request.title.clone(),
                    "--body".to_string(),
                    body,
                    "--head".to_string(),
                    branch.clone(),
                ]);
                if let Some(base) = &request.base {
                    args.extend(["--base".to_string(), base.clone()]);
                }
                let spec = CommandSpec::new(pr_program, args, root);
                let output = runner.run(&spec)?;
                pr_url = output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .rfind(|line| !line.is_empty())
                    .map(str::to_string);
                after_tool(stage, &spec.display(), &output)
            }
            Stage::Done => Transition::Finish(Terminal::Done),
        };

        match transition {
            Transition::Next(next) => {
                completed.push(stage);
                stage = next;
            }
            Transition::Finish(terminal) => {
                completed.push(stage);
                info!(branch = %branch, terminal = ?terminal, "pipeline finished");
                return Ok(PipelineOutcome {
                    branch,
                    terminal,
                    completed,
                    pr_url,
                });
            }
            Transition::Abort(err) => {
                warn!(stage = %stage, err = %err, "pipeline aborted");
                return Err(err);
            }
        }
    }
}
