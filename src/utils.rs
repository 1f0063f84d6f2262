use chrono::{DateTime, Duration, Utc};

/// Parses a tracker timestamp into UTC.
///
/// Jira emits `2024-01-15T10:30:00.000+0000` (offset without a colon), which
/// RFC 3339 rejects, so both shapes are accepted.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whole days elapsed between `since` and `now`, truncated toward zero.
pub fn whole_days_between(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days()
}

/// Formats a date the way JQL `DURING` clauses expect it.
pub fn jql_date(value: DateTime<Utc>) -> String {
    value.format("%Y/%m/%d").to_string()
}

/// Start of a trailing window of `days` ending at `now`.
pub fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}
