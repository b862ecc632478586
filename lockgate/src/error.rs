//! Error taxonomy shared by every lockgate operation.
//!
//! Each variant that concerns several items carries all of them so callers can
//! report every blocking lock or violated path, not just the first.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the lock store, guard, pruner and pipeline.
#[derive(Debug, Error)]
pub enum GateError {
    /// Missing or invalid input (flags, config values).
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more active claims block the operation.
    #[error("blocked by {} active lock(s):\n{}", .locks.len(), render_list(.locks))]
    Conflict { locks: Vec<String> },

    /// Protected paths were touched outside the lock lifecycle.
    #[error("{} protected path(s) modified:\n{}", .paths.len(), render_list(.paths))]
    PolicyViolation { paths: Vec<String> },

    /// The validation command exited nonzero (or was killed by a signal).
    #[error("validation command failed with exit code {}", render_code(.code))]
    Validation { code: Option<i32> },

    /// git or the PR tool exited nonzero.
    #[error("{command} failed with exit code {}: {stderr}", render_code(.code))]
    ExternalTool {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Filesystem failure.
    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Pruning refused because the working tree has uncommitted changes.
    #[error("working tree not clean ({} change(s)):\n{}", .entries.len(), render_list(.entries))]
    DirtyTree { entries: Vec<String> },
}

impl GateError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        GateError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for lockgate results.
pub type GateResult<T> = Result<T, GateError>;

fn render_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}
