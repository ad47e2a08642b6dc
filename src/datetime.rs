//! Date/time utilities for tempbox.
//!
//! Timestamps are stored as INTEGER Unix milliseconds so that retention
//! predicates can be evaluated in SQL against a caller-supplied instant.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Convert a UTC datetime to Unix milliseconds for storage.
pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert stored Unix milliseconds back to a UTC datetime.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Current time truncated to millisecond precision, matching what the store keeps.
pub fn now() -> DateTime<Utc> {
    from_millis(to_millis(&Utc::now()))
}

/// Instant `minutes` after `from`.
pub fn add_minutes(from: &DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    *from + Duration::minutes(minutes)
}

/// Retention cutoff: anything with a timestamp strictly before this is older than `days`.
pub fn retention_cutoff(now: &DateTime<Utc>, days: i64) -> DateTime<Utc> {
    *now - Duration::days(days)
}
