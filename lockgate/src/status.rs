//! Lock status summary for humans and machines.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::record::LockRecord;
use crate::core::staleness::age_days;
use crate::error::GateResult;
use crate::io::lock_store::list_records;

/// One row of the status report.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusEntry {
    pub name: String,
    pub path: String,
    /// Modification time, RFC 3339 UTC.
    pub modified: String,
    pub age_days: f64,
    pub status: String,
    pub owner: Option<String>,
    pub expires: Option<String>,
    pub note: Option<String>,
    pub blocking: bool,
    /// Every header field, keys lowercased.
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    /// Keep only records at least this many days old.
    pub min_age_days: Option<f64>,
    /// Keep only records with this owner (case-insensitive).
    pub owner: Option<String>,
}

impl StatusFilter {
    fn matches(&self, entry: &StatusEntry) -> bool {
        if let Some(min) = self.min_age_days
            && entry.age_days < min
        {
            return false;
        }
        if let Some(owner) = &self.owner {
            return entry
                .owner
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case(owner));
        }
        true
    }
}

impl StatusEntry {
    fn from_record(record: &LockRecord, now: SystemTime) -> Self {
        let fields = record
            .document
            .fields()
            .map(|(key, value)| (key.to_ascii_lowercase(), value.to_string()))
            .collect();
        let modified: DateTime<Utc> = record.modified_at.into();
        Self {
            name: record.file_name.clone(),
            path: record.path.display().to_string(),
            modified: modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            age_days: age_days(record.modified_at, now),
            status: record.status.to_string(),
            owner: record.owner.clone(),
            expires: record.expires.clone(),
            note: record.note.clone(),
            blocking: record.is_blocking(),
            fields,
        }
    }
}

/// Collect status rows for `dir`, sorted by file name, applying `filter`.
pub fn collect_status(
    dir: &Path,
    filter: &StatusFilter,
    now: SystemTime,
) -> GateResult<Vec<StatusEntry>> {
    Ok(list_records(dir)?
        .iter()
        .map(|record| StatusEntry::from_record(record, now))
        .filter(|entry| filter.matches(entry))
        .collect())
}

/// Fixed-width table, one lock per line.
pub fn render_table(entries: &[StatusEntry]) -> String {
    if entries.is_empty() {
        return "No lock files found\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{:<48} mtime={} age={:>5}d status={:<16} owner={}{}\n",
            entry.name,
            entry.modified,
            entry.age_days,
            entry.status,
            entry.owner.as_deref().unwrap_or("n/a"),
            if entry.blocking { "  [blocking]" } else { "" },
        ));
    }
    out
}
