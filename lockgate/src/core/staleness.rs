//! Staleness and release-marker rules for pruning.

use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::core::record::LockStatus;

/// Bytes of a lock file scanned for release markers and header fields.
pub const SCAN_LIMIT_BYTES: u64 = 16 * 1024;

const SECS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

static RELEASE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(RELEASED|UNLOCKED|ready-for-unlock)\b").expect("release marker regex")
});

/// True if the text carries a release marker anywhere.
pub fn has_release_marker(text: &str) -> bool {
    RELEASE_MARKER.is_match(text)
}

/// Convert a (possibly fractional) day count into a threshold.
pub fn age_threshold(days: f64) -> Result<Duration, String> {
    if !days.is_finite() || days < 0.0 {
        return Err(format!("age must be a non-negative number of days (got {days})"));
    }
    Ok(Duration::from_secs_f64(days * SECS_PER_DAY))
}

/// Age of a file at `now`. A modification time in the future counts as zero age.
pub fn age(modified: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

/// Age in days rounded to one decimal, for reports.
pub fn age_days(modified: SystemTime, now: SystemTime) -> f64 {
    (age(modified, now).as_secs_f64() / SECS_PER_DAY * 10.0).round() / 10.0
}

/// True once a record has gone untouched for at least `threshold`.
pub fn is_stale(modified: SystemTime, now: SystemTime, threshold: Duration) -> bool {
    age(modified, now) >= threshold
}

/// Decide whether a lock file's content allows deletion.
///
/// A marker anywhere in the scanned text is required. An explicit status that
/// is not a release token vetoes deletion even when a marker word appears in
/// prose; a missing status defers to the marker scan.
pub fn is_release_candidate(status: &LockStatus, scanned: &str) -> bool {
    match status {
        LockStatus::Absent => has_release_marker(scanned),
        status if status.is_release() => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn marker_matches_whole_words_case_insensitively() {
        assert!(has_release_marker("status: RELEASED"));
        assert!(has_release_marker("LOCK released by alice"));
        assert!(has_release_marker("moved to ready-for-unlock"));
        assert!(has_release_marker("Unlocked"));
        assert!(!has_release_marker("unreleased work in progress"));
        assert!(!has_release_marker("status: active"));
    }

    #[test]
    fn stale_once_threshold_is_reached() {
        let modified = SystemTime::UNIX_EPOCH;
        assert!(is_stale(modified, modified + 30 * DAY, 30 * DAY));
        assert!(!is_stale(modified, modified + 29 * DAY, 30 * DAY));
    }

    #[test]
    fn future_mtime_is_never_stale() {
        let now = SystemTime::UNIX_EPOCH + DAY;
        assert!(!is_stale(now + DAY, now, DAY));
    }

    #[test]
    fn missing_status_without_marker_is_never_a_candidate() {
        assert!(!is_release_candidate(&LockStatus::Absent, "owner: alice\n\nworking"));
        assert!(is_release_candidate(&LockStatus::Absent, "owner: alice\n\nLOCK RELEASED"));
    }

    #[test]
    fn explicit_active_status_vetoes_marker_in_prose() {
        let text = "status: active\n\nwill be released after review";
        assert!(!is_release_candidate(&LockStatus::Active, text));
        assert!(is_release_candidate(&LockStatus::Released, "status: released"));
    }

    #[test]
    fn age_threshold_rejects_negative_days() {
        assert!(age_threshold(-1.0).is_err());
        assert_eq!(age_threshold(1.0).expect("threshold"), DAY);
    }
}
