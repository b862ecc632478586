//! Release of stale blocking locks, with an audit trail.
//!
//! A blocking lock whose claim is older than the threshold is moved to
//! `<lock dir>/released/RELEASED-<name>`: its header is marked released, a
//! release note is appended, and an event is added to
//! `<lock dir>/unlock-log.json`. Releasing requires an agent identity, which
//! is recorded in both places.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::header::{Document, validate_field};
use crate::core::record::LockRecord;
use crate::error::{GateError, GateResult};
use crate::io::git::Git;
use crate::io::lock_service::LockService;
use crate::io::lock_store::write_atomic;
use crate::io::mutex::{MutexLocation, WorktreeMutex};
use crate::io::process::ProcessRunner;

/// Subdirectory of the lock directory holding released copies.
pub const RELEASED_DIR: &str = "released";
pub const RELEASED_PREFIX: &str = "RELEASED-";
/// Audit log file inside the lock directory (a JSON array of events).
pub const UNLOCK_LOG: &str = "unlock-log.json";
pub const STALE_REASON: &str = "stale-unlock";

/// Header fields consulted, in order, for the claim time.
const CLAIM_TIME_FIELDS: [&str; 2] = ["timestamp", "created"];

/// A blocking lock past the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleLock {
    pub file_name: String,
    pub path: PathBuf,
    pub claimed_at: DateTime<Utc>,
    /// Age in hours, rounded to two decimals.
    pub age_hours: f64,
}

#[derive(Debug, Clone)]
pub struct UnlockRequest {
    pub stale_hours: f64,
    /// Required unless `dry_run` is set.
    pub agent: Option<String>,
    pub model: Option<String>,
    pub dry_run: bool,
    pub worktree_mutex: MutexLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnlockOutcome {
    NothingToDo,
    DryRun { stale: Vec<StaleLock> },
    /// Names of the released copies, in `released/`.
    Released { released: Vec<String> },
}

/// One entry of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockEvent {
    pub file: String,
    pub released_at: String,
    pub released_by: String,
    pub model: String,
    pub reason: String,
}

/// Claim time of `record`: a `timestamp:` or `created:` header in RFC 3339,
/// else the file's mtime.
pub fn claimed_at(record: &LockRecord) -> DateTime<Utc> {
    CLAIM_TIME_FIELDS
        .iter()
        .filter_map(|key| record.document.get(key))
        .find_map(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or_else(|| record.modified_at.into())
}

/// Blocking records claimed more than `stale_hours` ago.
#[instrument(skip_all, fields(stale_hours = stale_hours))]
pub fn find_stale_blocking<L: LockService + ?Sized>(
    locks: &L,
    stale_hours: f64,
    now: DateTime<Utc>,
) -> GateResult<Vec<StaleLock>> {
    if !stale_hours.is_finite() || stale_hours < 0.0 {
        return Err(GateError::Config(format!(
            "stale threshold must be a non-negative number of hours, got {stale_hours}"
        )));
    }
    let mut stale = Vec::new();
    for record in locks.blocking()? {
        let claimed = claimed_at(&record);
        let age_hours = (now - claimed).num_milliseconds() as f64 / 3_600_000.0;
        if age_hours <= stale_hours {
            continue;
        }
        debug!(file = %record.file_name, age_hours, "stale lock");
        stale.push(StaleLock {
            file_name: record.file_name,
            path: record.path,
            claimed_at: claimed,
            age_hours: (age_hours * 100.0).round() / 100.0,
        });
    }
    Ok(stale)
}

/// Find stale blocking locks and, unless `request.dry_run`, release them.
///
/// Stops at the first lock that cannot be moved; locks released before it
/// stay released and logged.
#[instrument(skip_all, fields(dry_run = request.dry_run))]
pub fn unlock_stale<L, R>(
    root: &Path,
    locks: &L,
    runner: &R,
    request: &UnlockRequest,
    now: DateTime<Utc>,
) -> GateResult<UnlockOutcome>
where
    L: LockService + ?Sized,
    R: ProcessRunner + ?Sized,
{
    if request.dry_run {
        let stale = find_stale_blocking(locks, request.stale_hours, now)?;
        if stale.is_empty() {
            return Ok(UnlockOutcome::NothingToDo);
        }
        return Ok(UnlockOutcome::DryRun { stale });
    }

    let agent = request
        .agent
        .as_deref()
        .map(str::trim)
        .filter(|agent| !agent.is_empty())
        .ok_or_else(|| {
            GateError::Config(
                "releasing stale locks requires an agent identity: pass --agent or set UNLOCK_AGENT_NAME"
                    .to_string(),
            )
        })?;
    validate_field("released-by", agent).map_err(GateError::Config)?;
    let model = request.model.as_deref().map(str::trim).unwrap_or_default();
    if !model.is_empty() {
        validate_field("model", model).map_err(GateError::Config)?;
    }

    let git = Git::new(root, runner);
    let _mutex = WorktreeMutex::acquire_at(&request.worktree_mutex, &git, "unlock-stale")?;

    let stale = find_stale_blocking(locks, request.stale_hours, now)?;
    if stale.is_empty() {
        return Ok(UnlockOutcome::NothingToDo);
    }

    let lock_dir = locks.lock_dir();
    let released_dir = lock_dir.join(RELEASED_DIR);
    fs::create_dir_all(&released_dir)
        .map_err(|err| GateError::io("create released directory", &released_dir, err))?;

    let mut released = Vec::new();
    for lock in &stale {
        let event = UnlockEvent {
            file: lock.file_name.clone(),
            released_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            released_by: agent.to_string(),
            model: model.to_string(),
            reason: STALE_REASON.to_string(),
        };
        let dest = move_to_released(lock, &released_dir, &event, now)?;
        append_event(&lock_dir.join(UNLOCK_LOG), &event)?;
        info!(file = %lock.file_name, dest = %dest.display(), "released stale lock");
        released.push(
            dest.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
    }
    Ok(UnlockOutcome::Released { released })
}

/// Write the released copy, then remove the original. An earlier copy with
/// the same name is kept by suffixing the new one with the release time.
fn move_to_released(
    lock: &StaleLock,
    released_dir: &Path,
    event: &UnlockEvent,
    now: DateTime<Utc>,
) -> GateResult<PathBuf> {
    let original = fs::read_to_string(&lock.path)
        .map_err(|err| GateError::io("read lock file", &lock.path, err))?;
    let mut document = Document::parse(&original);
    document.set("status", "released");
    document.set("released-by", &event.released_by);
    document.set("released-at", &event.released_at);

    let mut contents = document.render();
    contents.push_str(&format!(
        "\n\nLOCK RELEASED\nReleased: {}\nReleased by: {}\nModel: {}\nReason: {}\n",
        event.released_at, event.released_by, event.model, event.reason
    ));

    let mut dest = released_dir.join(format!("{RELEASED_PREFIX}{}", lock.file_name));
    if dest.exists() {
        let stem = lock.file_name.trim_end_matches(".md");
        dest = released_dir.join(format!(
            "{RELEASED_PREFIX}{stem}-{}.md",
            now.format("%Y%m%d%H%M%S")
        ));
    }
    write_atomic(&dest, &contents)?;
    fs::remove_file(&lock.path).map_err(|err| GateError::io("remove lock file", &lock.path, err))?;
    Ok(dest)
}

/// Append `event` to the JSON array at `path`, creating it if missing.
///
/// Entries written by other tools are kept as they are. A file that is not a
/// JSON array is an error and is left untouched.
pub fn append_event(path: &Path, event: &UnlockEvent) -> GateResult<()> {
    let mut entries: Vec<serde_json::Value> = match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Vec::new(),
        Ok(text) => serde_json::from_str(&text).map_err(|err| {
            GateError::Config(format!("{} is not a JSON array: {err}", path.display()))
        })?,
        Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(GateError::io("read unlock log", path, err)),
    };
    let value = serde_json::to_value(event)
        .map_err(|err| GateError::Config(format!("serialize unlock event: {err}")))?;
    entries.push(value);
    let mut rendered = serde_json::to_string_pretty(&entries)
        .map_err(|err| GateError::Config(format!("serialize unlock log: {err}")))?;
    rendered.push('\n');
    write_atomic(path, &rendered)
}
