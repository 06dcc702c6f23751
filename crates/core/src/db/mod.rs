//! SQLite-backed durable metadata and render-job tables.
//!
//! Async access goes through tokio-rusqlite, which runs database work on a
//! background thread. The job table enforces the one-active-job-per-URL
//! invariant with a partial unique index, so admission stays atomic even
//! across processes sharing the database file.

pub mod connection;
pub mod jobs;
pub mod migrations;
pub mod pages;

pub use crate::Error;

pub use connection::MetaDb;
pub use jobs::{Admitted, JobCounts, JobStatus, RenderJob};
pub use pages::{CachedPage, StorageLocation};

use chrono::{DateTime, Utc};
use tokio_rusqlite::rusqlite;

/// Parse an RFC 3339 timestamp read back from a TEXT column.
pub(crate) fn parse_ts(col: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e)))
}
