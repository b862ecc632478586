//! Lock record model and status classification.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::core::header::Document;

/// File name prefix of a lock record (matched case-insensitively).
pub const LOCK_FILE_PREFIX: &str = "LOCKED-";
/// File name suffix of a lock record.
pub const LOCK_FILE_SUFFIX: &str = ".md";

/// Classified `status:` header value.
///
/// Anything whose first word is not a release word blocks automated PR creation,
/// including an unrecognized value or a missing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    Active,
    Released,
    ReadyForUnlock,
    Unlocked,
    Unknown(String),
    Absent,
}

impl LockStatus {
    /// Classify a raw status value by its first word, case-insensitively.
    ///
    /// Trailing text after the first word is ignored (`released (2026-01-02)`),
    /// but a qualifier in front of a release word is not: `not released` and
    /// `active until released` stay blocking.
    pub fn classify(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return LockStatus::Absent;
        };
        let lowered = raw.trim().to_ascii_lowercase();
        let first = lowered
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .next()
            .unwrap_or_default();
        match first {
            "released" => LockStatus::Released,
            "ready-for-unlock" => LockStatus::ReadyForUnlock,
            "unlocked" => LockStatus::Unlocked,
            "active" => LockStatus::Active,
            _ => LockStatus::Unknown(raw.trim().to_string()),
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(
            self,
            LockStatus::Released | LockStatus::ReadyForUnlock | LockStatus::Unlocked
        )
    }

    pub fn is_blocking(&self) -> bool {
        !self.is_release()
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::Active => write!(f, "active"),
            LockStatus::Released => write!(f, "released"),
            LockStatus::ReadyForUnlock => write!(f, "ready-for-unlock"),
            LockStatus::Unlocked => write!(f, "unlocked"),
            LockStatus::Unknown(raw) => write!(f, "{raw}"),
            LockStatus::Absent => write!(f, "n/a"),
        }
    }
}

/// True if `name` follows the `LOCKED-<slug>.md` convention.
pub fn is_lock_file_name(name: &str) -> bool {
    lock_id(name).is_some()
}

/// Slug of a lock file name, or `None` if the name does not follow the convention.
pub fn lock_id(name: &str) -> Option<&str> {
    let prefix_len = LOCK_FILE_PREFIX.len();
    if name.len() <= prefix_len + LOCK_FILE_SUFFIX.len() {
        return None;
    }
    if !name.is_char_boundary(prefix_len)
        || !name[..prefix_len].eq_ignore_ascii_case(LOCK_FILE_PREFIX)
        || !name.ends_with(LOCK_FILE_SUFFIX)
    {
        return None;
    }
    Some(&name[prefix_len..name.len() - LOCK_FILE_SUFFIX.len()])
}

/// File name for a lock with the given slug.
pub fn lock_file_name(slug: &str) -> String {
    format!("{LOCK_FILE_PREFIX}{slug}{LOCK_FILE_SUFFIX}")
}

/// Validate that a slug is safe as part of a file name.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("lock slug must not be empty".to_string());
    }
    if slug
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(format!("lock slug must be [A-Za-z0-9._-] only (got '{slug}')"));
    }
    Ok(())
}

/// One advisory claim over the repository.
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub owner: Option<String>,
    pub expires: Option<String>,
    pub status: LockStatus,
    pub note: Option<String>,
    pub created_at: Option<SystemTime>,
    pub modified_at: SystemTime,
    pub document: Document,
}

impl LockRecord {
    /// Build a record from a parsed header and filesystem timestamps.
    pub fn from_document(
        file_name: &str,
        path: PathBuf,
        document: Document,
        created_at: Option<SystemTime>,
        modified_at: SystemTime,
    ) -> Self {
        let field = |key: &str| document.get(key).map(str::to_string);
        Self {
            id: lock_id(file_name).unwrap_or(file_name).to_string(),
            file_name: file_name.to_string(),
            path,
            owner: field("owner"),
            expires: field("expires"),
            status: LockStatus::classify(document.get("status")),
            note: field("note"),
            created_at,
            modified_at,
            document,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }
}
