//! Timestamp helpers.
//!
//! Timestamps are persisted as RFC 3339 UTC text with microsecond precision
//! and a `Z` suffix. The fixed width makes lexicographic order equal to
//! chronological order, which the event log relies on for portable
//! `ORDER BY` / range filtering across backends.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time truncated to microseconds — the precision the store
/// persists, so values survive an encode/decode round trip unchanged.
pub fn utc_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Render a timestamp in the persisted format.
pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp in the persisted format.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
