//! Database table operations, one module per table.
//!
//! All methods are implemented on the `Database` struct defined in
//! `db/sqlite.rs`.

pub mod audit_logs;
pub mod tasks;
pub mod transactions;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp column, falling back to now on corrupt data
pub(crate) fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().map(parse_ts)
}
