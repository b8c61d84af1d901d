// src/core/pipeline/age_filter.rs

use chrono::{DateTime, NaiveDateTime, Utc};

/// The fixed timestamp format the API uses for `updated_at`, always UTC.
/// Example: `2016-12-24T07:25:35+00:00`.
const UPDATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// Decides whether a record is too old to classify.
///
/// A missing or unparsable `updated_at` is treated as the Unix epoch, so
/// such records are dropped whenever an age limit is configured at all.
/// `limit_days == 0` disables filtering entirely. A record aged exactly
/// `limit_days` is still fresh; one second older is stale.
pub fn is_stale(updated_at: Option<&str>, limit_days: i64, now: DateTime<Utc>) -> bool {
    if limit_days <= 0 {
        return false;
    }

    let timestamp = updated_at
        .and_then(|s| NaiveDateTime::parse_from_str(s, UPDATED_AT_FORMAT).ok())
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::UNIX_EPOCH);

    now.signed_duration_since(timestamp).num_seconds() > limit_days * 86400
}
