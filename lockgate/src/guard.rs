//! Protected path guard for commits and CI.
//!
//! Collects the change set from git (staged index locally, `git diff <base> HEAD` in CI)
//! and rejects it when any path falls under a protected prefix.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::core::protected::{Violation, check_paths};
use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::process::ProcessRunner;

/// Where the change set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// Paths staged in the index (pre-commit).
    Staged,
    /// Paths that differ between `base_ref` and `HEAD` (CI).
    Diff { base_ref: String },
}

/// Collect the change set for `source`.
pub fn changed_paths<R: ProcessRunner + ?Sized>(
    root: &Path,
    runner: &R,
    source: &ChangeSource,
) -> GateResult<Vec<String>> {
    let git = Git::new(root, runner);
    match source {
        ChangeSource::Staged => git.staged_paths(),
        ChangeSource::Diff { base_ref } => git.diff_paths(base_ref),
    }
}

/// Check the change set; `PolicyViolation` lists every offending path.
#[instrument(skip_all, fields(source = ?source))]
pub fn guard<R: ProcessRunner + ?Sized, Q: AsRef<str>>(
    root: &Path,
    runner: &R,
    source: &ChangeSource,
    protected_prefixes: &[Q],
) -> GateResult<Vec<String>> {
    let changed = changed_paths(root, runner, source)?;
    let violations = check_paths(&changed, protected_prefixes);
    if violations.is_empty() {
        info!(checked = changed.len(), "no protected paths touched");
        return Ok(changed);
    }
    for Violation { path, prefix } in &violations {
        warn!(path = %path, prefix = %prefix, "protected path modified");
    }
    Err(GateError::PolicyViolation {
        paths: violations.into_iter().map(|violation| violation.path).collect(),
    })
}
