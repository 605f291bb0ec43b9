use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// Timestamps are stored as fixed-width RFC 3339 (microseconds, Z) so that
/// lexicographic ordering in SQL matches chronological ordering.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("timestamp {s:?}: {e}")))
}

pub fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(|v| parse_ts(&v)).transpose()
}
