//! Pure state machine for the automated PR pipeline.
//!
//! Each transition is a function of the previous stage's observed result
//! (lock listing, process output, staged paths). The driver in
//! [`crate::pipeline`] performs the I/O and feeds results back in here.

use std::fmt;

use crate::core::record::LockRecord;
use crate::core::types::ProcessOutput;
use crate::error::GateError;

/// Pipeline stages, strictly sequential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Start,
    LockCheck,
    Validate,
    Branch,
    StageChanges,
    Commit,
    Push,
    CreatePr,
    Done,
}

impl Stage {
    /// The stage that follows a successful `self`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::LockCheck),
            Stage::LockCheck => Some(Stage::Validate),
            Stage::Validate => Some(Stage::Branch),
            Stage::Branch => Some(Stage::StageChanges),
            Stage::StageChanges => Some(Stage::Commit),
            Stage::Commit => Some(Stage::Push),
            Stage::Push => Some(Stage::CreatePr),
            Stage::CreatePr => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Start => "start",
            Stage::LockCheck => "lock-check",
            Stage::Validate => "validate",
            Stage::Branch => "branch",
            Stage::StageChanges => "stage",
            Stage::Commit => "commit",
            Stage::Push => "push",
            Stage::CreatePr => "create-pr",
            Stage::Done => "done",
        };
        f.write_str(label)
    }
}

/// Successful end states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// PR created.
    Done,
    /// Gates passed but there was nothing staged to commit.
    NothingToCommit,
}

/// Outcome of feeding a stage result into the machine.
#[derive(Debug)]
pub enum Transition {
    Next(Stage),
    Finish(Terminal),
    Abort(GateError),
}

/// `LockCheck`: any blocking record aborts, listing every one.
pub fn after_lock_check(records: &[LockRecord]) -> Transition {
    let blocking: Vec<String> = records
        .iter()
        .filter(|record| record.is_blocking())
        .map(|record| record.file_name.clone())
        .collect();
    if blocking.is_empty() {
        return advance(Stage::LockCheck);
    }
    Transition::Abort(GateError::Conflict { locks: blocking })
}

/// `Validate`: nonzero exit aborts, carrying the child's exit code.
pub fn after_validate(output: &ProcessOutput) -> Transition {
    if output.success() {
        return advance(Stage::Validate);
    }
    Transition::Abort(GateError::Validation {
        code: output.exit_code,
    })
}

/// `Branch`, `StageChanges`, `Push`, `CreatePr`: nonzero exit of the external
/// tool aborts.
pub fn after_tool(stage: Stage, command: &str, output: &ProcessOutput) -> Transition {
    if output.success() {
        return advance(stage);
    }
    Transition::Abort(GateError::ExternalTool {
        command: command.to_string(),
        code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    })
}

/// `Commit` precondition: an empty staged diff ends the run successfully.
pub fn commit_decision(staged_paths: &[String]) -> Option<Transition> {
    if staged_paths.is_empty() {
        return Some(Transition::Finish(Terminal::NothingToCommit));
    }
    None
}

fn advance(stage: Stage) -> Transition {
    match stage.next() {
        Some(Stage::Done) | None => Transition::Finish(Terminal::Done),
        Some(next) => Transition::Next(next),
    }
}
