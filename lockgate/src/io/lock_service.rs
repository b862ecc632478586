//! Lock service backends over the `Lock/` directory.
//!
//! Both backends share the on-disk format and differ only in how a new claim
//! is created. [`FileLockService`] checks for an existing file and then writes
//! it, so two claimants racing for the same slug can both "win" (the second
//! silently replaces the first). [`ExclusiveLockService`] creates the file with
//! `O_EXCL` semantics so exactly one claimant succeeds.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::record::{LockRecord, lock_file_name, validate_slug};
use crate::error::{GateError, GateResult};
use crate::io::lock_store::{annotate, list_records};

/// Which backend creates new claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    #[default]
    Exclusive,
    File,
}

/// A new claim to write into the lock directory.
#[derive(Debug, Clone)]
pub struct LockClaim {
    pub slug: String,
    pub owner: String,
    pub note: Option<String>,
    pub expires: Option<String>,
}

impl LockClaim {
    /// Initial file contents: metadata header, blank line, title.
    pub fn render(&self, created_at: DateTime<Utc>) -> String {
        let mut buf = String::new();
        buf.push_str(&format!("owner: {}\n", self.owner));
        buf.push_str("status: active\n");
        buf.push_str(&format!(
            "created: {}\n",
            created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        if let Some(expires) = &self.expires {
            buf.push_str(&format!("expires: {expires}\n"));
        }
        if let Some(note) = &self.note {
            buf.push_str(&format!("note: {note}\n"));
        }
        buf.push('\n');
        buf.push_str(&format!("# Lock: {}\n", self.slug));
        buf
    }

    fn validate(&self) -> GateResult<()> {
        validate_slug(&self.slug).map_err(GateError::Config)?;
        for (key, value) in [
            ("owner", Some(self.owner.as_str())),
            ("note", self.note.as_deref()),
            ("expires", self.expires.as_deref()),
        ] {
            if let Some(value) = value {
                crate::core::header::validate_field(key, value).map_err(GateError::Config)?;
            }
        }
        Ok(())
    }
}

/// Operations over the shared lock directory.
pub trait LockService {
    fn lock_dir(&self) -> &Path;

    /// Create a new claim; fails with `Conflict` if the slug is already claimed.
    fn acquire(&self, claim: &LockClaim, now: DateTime<Utc>) -> GateResult<PathBuf>;

    /// Snapshot of every record in the directory.
    fn records(&self) -> GateResult<Vec<LockRecord>> {
        list_records(self.lock_dir())
    }

    /// Records whose status does not mark release.
    fn blocking(&self) -> GateResult<Vec<LockRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(LockRecord::is_blocking)
            .collect())
    }

    /// Merge header fields into an existing record.
    fn annotate(
        &self,
        file_name: &str,
        updates: &[(String, String)],
        note: Option<&str>,
    ) -> GateResult<bool> {
        annotate(&self.lock_dir().join(file_name), updates, note)
    }

    /// Mark a record released, recording who released it and when.
    fn release(&self, file_name: &str, released_by: &str, now: DateTime<Utc>) -> GateResult<bool> {
        let updates = vec![
            ("status".to_string(), "released".to_string()),
            ("released-by".to_string(), released_by.to_string()),
            (
                "released-at".to_string(),
                now.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        ];
        self.annotate(file_name, &updates, None)
    }
}

/// Backend that writes claims after an existence check.
#[derive(Debug, Clone)]
pub struct FileLockService {
    dir: PathBuf,
}

impl FileLockService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl LockService for FileLockService {
    fn lock_dir(&self) -> &Path {
        &self.dir
    }

    #[instrument(skip_all, fields(slug = %claim.slug))]
    fn acquire(&self, claim: &LockClaim, now: DateTime<Utc>) -> GateResult<PathBuf> {
        claim.validate()?;
        ensure_dir(&self.dir)?;
        let name = lock_file_name(&claim.slug);
        let path = self.dir.join(&name);
        if path.exists() {
            return Err(GateError::Conflict { locks: vec![name] });
        }
        fs::write(&path, claim.render(now))
            .map_err(|err| GateError::io("write lock file", &path, err))?;
        info!(path = %path.display(), "lock acquired");
        Ok(path)
    }
}

/// Backend that creates claims with exclusive create.
#[derive(Debug, Clone)]
pub struct ExclusiveLockService {
    dir: PathBuf,
}

impl ExclusiveLockService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl LockService for ExclusiveLockService {
    fn lock_dir(&self) -> &Path {
        &self.dir
    }

    #[instrument(skip_all, fields(slug = %claim.slug))]
    fn acquire(&self, claim: &LockClaim, now: DateTime<Utc>) -> GateResult<PathBuf> {
        claim.validate()?;
        ensure_dir(&self.dir)?;
        let name = lock_file_name(&claim.slug);
        let path = self.dir.join(&name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("claim already exists");
                return Err(GateError::Conflict { locks: vec![name] });
            }
            Err(err) => return Err(GateError::io("create lock file", &path, err)),
        };
        file.write_all(claim.render(now).as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|err| GateError::io("write lock file", &path, err))?;
        info!(path = %path.display(), "lock acquired");
        Ok(path)
    }
}

/// Build the configured backend for `dir`.
pub fn lock_service(backend: LockBackend, dir: impl Into<PathBuf>) -> Box<dyn LockService> {
    match backend {
        LockBackend::Exclusive => Box::new(ExclusiveLockService::new(dir)),
        LockBackend::File => Box::new(FileLockService::new(dir)),
    }
}

fn ensure_dir(dir: &Path) -> GateResult<()> {
    fs::create_dir_all(dir).map_err(|err| GateError::io("create lock directory", dir, err))
}
