//! Timestamp columns are stored as RFC 3339 text.

use chrono::{DateTime, Utc};

/// Read a stored timestamp; unparseable values become the Unix epoch.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => DateTime::UNIX_EPOCH,
    }
}

pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}
