//! Shared helpers: error types and timestamp formatting.

pub mod error;

use chrono::{SecondsFormat, Utc};

/// Current UTC time as an ISO-8601 string with millisecond precision,
/// the `ts` format used on every wire frame and replay entry.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
