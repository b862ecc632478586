//! On-disk lock record store (`Lock/LOCKED-<slug>.md`).
//!
//! The store assumes a single writer: `annotate` reads, merges and rewrites a
//! file without any file locking, so a concurrent edit between the read and the
//! rename is lost. Listing is a snapshot; a lock created right after
//! `list_records` returns is not observed.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::header::{Document, validate_field};
use crate::core::record::{LockRecord, is_lock_file_name};
use crate::core::staleness::SCAN_LIMIT_BYTES;
use crate::error::{GateError, GateResult};

/// List every lock record in `dir`, sorted by file name.
///
/// A missing directory yields no records. Files not following the
/// `LOCKED-<slug>.md` convention are ignored.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn list_records(dir: &Path) -> GateResult<Vec<LockRecord>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("lock directory missing, no records");
            return Ok(Vec::new());
        }
        Err(err) => return Err(GateError::io("read lock directory", dir, err)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| GateError::io("read lock directory", dir, err))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_lock_file_name(&name) {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|err| GateError::io("stat lock entry", entry.path(), err))?;
        if file_type.is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let mut records = Vec::with_capacity(names.len());
    for name in names {
        records.push(parse_record(&dir.join(&name))?);
    }
    debug!(count = records.len(), "listed lock records");
    Ok(records)
}

/// Parse one lock file, reading at most the first 16 KiB.
pub fn parse_record(path: &Path) -> GateResult<LockRecord> {
    let text = read_prefix(path, SCAN_LIMIT_BYTES)?;
    let metadata = fs::metadata(path).map_err(|err| GateError::io("stat lock file", path, err))?;
    let modified = metadata
        .modified()
        .map_err(|err| GateError::io("read lock mtime", path, err))?;
    let created = metadata.created().ok();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(LockRecord::from_document(
        &file_name,
        path.to_path_buf(),
        Document::parse(&text),
        created,
        modified,
    ))
}

/// Read at most `limit` bytes of a file as (lossy) UTF-8.
pub fn read_prefix(path: &Path, limit: u64) -> GateResult<String> {
    let file = File::open(path).map_err(|err| GateError::io("open lock file", path, err))?;
    let mut buf = Vec::new();
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|err| GateError::io("read lock file", path, err))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Merge `updates` (and `note`, if given) into the header of `path`.
///
/// Existing keys are overwritten in place (case-insensitive), new keys are
/// appended to the header, and the body is preserved byte-for-byte. The file is
/// only rewritten when its content changes, so repeating an annotation is a
/// no-op. Returns whether the file changed.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn annotate(path: &Path, updates: &[(String, String)], note: Option<&str>) -> GateResult<bool> {
    for (key, value) in updates {
        validate_field(key, value).map_err(GateError::Config)?;
    }
    if let Some(note) = note {
        validate_field("note", note).map_err(GateError::Config)?;
    }

    let original =
        fs::read_to_string(path).map_err(|err| GateError::io("read lock file", path, err))?;
    let mut document = Document::parse(&original);
    for (key, value) in updates {
        document.set(key, value);
    }
    if let Some(note) = note {
        document.set("note", note);
    }

    let rendered = document.render();
    if rendered == original {
        debug!("annotation already applied");
        return Ok(false);
    }
    write_atomic(path, &rendered)?;
    debug!(fields = updates.len(), "lock annotated");
    Ok(true)
}

/// Atomically replace a file (`<name>.tmp` + rename).
pub fn write_atomic(path: &Path, contents: &str) -> GateResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)
        .map_err(|err| GateError::io("write temp file", &tmp_path, err))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            warn!(err = %cleanup, "failed to remove temp file");
        }
        return Err(GateError::io("replace file", path, err));
    }
    Ok(())
}
