//! Advisory lock registry and lock-gated PR automation for git repositories.
//!
//! Contributors claim parts of a repository by committing `Lock/LOCKED-<slug>.md`
//! files. lockgate reads and annotates those claims, keeps ordinary commits
//! out of protected paths, prunes stale released claims, and refuses to open an
//! automated PR while any claim is active.
//!
//! - **[`core`]**: Pure logic (header parsing, status classification, prefix
//!   matching, staleness, pipeline transitions). No I/O.
//! - **[`io`]**: Side effects (lock files, git, child processes, config, the
//!   worktree mutex), behind seams that tests can script.
//!
//! Orchestration modules ([`guard`], [`prune`], [`pipeline`], [`status`],
//! [`unlock`], [`restore`]) combine the two to implement the CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod guard;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod prune;
pub mod restore;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod unlock;
