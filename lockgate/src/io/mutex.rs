//! Exclusive-create mutex serializing worktree mutations.
//!
//! The pipeline and the mutating lock commands hold this for their duration,
//! so two mutating invocations in one worktree cannot interleave. Acquisition
//! never waits: a file held by a live process aborts the caller. A file left
//! behind by a process that no longer exists is reclaimed.
//!
//! By default the file lives in the worktree's git directory, resolved with
//! `git rev-parse --git-path`, which also works in linked worktrees and
//! submodules where `.git` is a file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::process::ProcessRunner;

/// File name of the mutex inside the git directory.
pub const DEFAULT_MUTEX_NAME: &str = "lockgate.lock";

/// Where the mutex file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutexLocation {
    Disabled,
    /// A name inside the current worktree's git directory.
    GitDir(String),
    /// An explicit path.
    Path(PathBuf),
}

impl MutexLocation {
    /// Concrete file path, or `None` when disabled.
    pub fn resolve<R: ProcessRunner + ?Sized>(
        &self,
        git: &Git<'_, R>,
    ) -> GateResult<Option<PathBuf>> {
        match self {
            MutexLocation::Disabled => Ok(None),
            MutexLocation::GitDir(name) => git.git_path(name).map(Some),
            MutexLocation::Path(path) => Ok(Some(path.clone())),
        }
    }
}

/// Held mutex; the file is removed on drop.
#[derive(Debug)]
pub struct WorktreeMutex {
    path: PathBuf,
}

impl WorktreeMutex {
    /// Create `path` exclusively, recording the holder's pid and purpose.
    ///
    /// An existing file whose recorded pid is no longer running is removed and
    /// the create retried once. A holder without a readable pid counts as live.
    pub fn acquire(path: &Path, purpose: &str) -> GateResult<Self> {
        if let Some(mutex) = Self::try_create(path, purpose)? {
            return Ok(mutex);
        }

        let holder = read_holder(path);
        if let Some(pid) = holder_pid(&holder)
            && !process_alive(pid)
        {
            warn!(path = %path.display(), pid, "reclaiming worktree mutex left by exited process");
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(GateError::io("remove stale worktree mutex", path, err)),
            }
            if let Some(mutex) = Self::try_create(path, purpose)? {
                return Ok(mutex);
            }
        }

        let holder = read_holder(path);
        warn!(path = %path.display(), holder = %holder, "worktree mutex held");
        Err(GateError::Conflict {
            locks: vec![format!("{} ({holder})", path.display())],
        })
    }

    /// Resolve `location` and acquire it; `Disabled` yields `None`.
    pub fn acquire_at<R: ProcessRunner + ?Sized>(
        location: &MutexLocation,
        git: &Git<'_, R>,
        purpose: &str,
    ) -> GateResult<Option<Self>> {
        location
            .resolve(git)?
            .map(|path| Self::acquire(&path, purpose))
            .transpose()
    }

    /// `None` when the file already exists.
    fn try_create(path: &Path, purpose: &str) -> GateResult<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(GateError::io("create worktree mutex", path, err)),
        };
        let mutex = Self {
            path: path.to_path_buf(),
        };
        let contents = format!("pid={} purpose={purpose}\n", std::process::id());
        file.write_all(contents.as_bytes())
            .map_err(|err| GateError::io("write worktree mutex", path, err))?;
        debug!(path = %path.display(), purpose, "worktree mutex acquired");
        Ok(Some(mutex))
    }
}

impl Drop for WorktreeMutex {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to remove worktree mutex");
        } else {
            debug!(path = %self.path.display(), "worktree mutex released");
        }
    }
}

fn read_holder(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|text| text.trim().to_string())
        .unwrap_or_else(|_| "unknown holder".to_string())
}

fn holder_pid(holder: &str) -> Option<u32> {
    holder
        .split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

/// Whether `pid` names a running process on this host.
///
/// Uses `/proc` where it exists and `kill -0` elsewhere. When neither gives an
/// answer the holder is assumed alive.
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc_root = Path::new("/proc");
    if proc_root.join("self").exists() {
        return proc_root.join(pid.to_string()).exists();
    }
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}
