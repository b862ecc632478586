//! Stable exit codes for lockgate CLI commands.

use crate::error::GateError;

/// Command succeeded (including a pipeline with nothing to commit).
pub const OK: i32 = 0;
/// Generic failure: invalid config, missing file, I/O or external tool error.
pub const FAILURE: i32 = 1;
/// An active lock blocked `pr`, or `acquire` found the slug already claimed.
pub const CONFLICT: i32 = 2;
/// `guard` found protected paths in the change set.
pub const VIOLATION: i32 = 2;
/// `prune` or `restore` dry run found candidates.
pub const DRY_RUN: i32 = 2;
/// `prune --apply` refused to run on a dirty worktree.
pub const DIRTY: i32 = 3;
/// `prune` or `restore` hit an unexpected error.
pub const UNEXPECTED: i32 = 4;

/// Exit code for a failed `pr` run.
///
/// A failed validation command passes its own exit code through.
pub fn for_pipeline_error(err: &GateError) -> i32 {
    match err {
        GateError::Conflict { .. } => CONFLICT,
        GateError::Validation { code: Some(code) } if *code != OK => *code,
        _ => FAILURE,
    }
}

/// Exit code for a failed `prune` run.
pub fn for_prune_error(err: &GateError) -> i32 {
    match err {
        GateError::DirtyTree { .. } => DIRTY,
        _ => UNEXPECTED,
    }
}

/// Exit code for a failed `restore` run.
pub fn for_restore_error(err: &GateError) -> i32 {
    match err {
        GateError::Conflict { .. } => CONFLICT,
        _ => UNEXPECTED,
    }
}

/// Exit code for a failed `guard` run.
pub fn for_guard_error(err: &GateError) -> i32 {
    match err {
        GateError::PolicyViolation { .. } => VIOLATION,
        _ => FAILURE,
    }
}

/// Exit code for a failed `acquire`, `annotate`, `release` or `unlock-stale`.
pub fn for_lock_error(err: &GateError) -> i32 {
    match err {
        GateError::Conflict { .. } => CONFLICT,
        _ => FAILURE,
    }
}
