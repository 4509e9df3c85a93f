//! UTC normalization helpers.
//!
//! Every instant the engine compares against "now" goes through here, so a
//! timezone-less value can never leak into candle arithmetic.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Treat a naive timestamp as UTC.
pub fn ensure_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Convert wire milliseconds since epoch into a UTC instant.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse an RFC 3339 timestamp, or a naive `YYYY-MM-DD HH:MM:SS[.f]` /
/// `YYYY-MM-DDTHH:MM:SS[.f]` timestamp which is taken to be UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(ensure_utc)
}
