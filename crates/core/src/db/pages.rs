//! Cached-page metadata CRUD.
//!
//! One row per normalized URL, created on first successful render and
//! touched on every cache hit. The cache tier orchestrator is the sole
//! writer of this table.

use super::connection::MetaDb;
use super::parse_ts;
use crate::{Error, NormalizedUrl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Which tier currently holds the page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    /// Fast tier has the content.
    Hot,
    /// Only the durable object store has the content.
    Cold,
    /// Content is gone; only this metadata row remains.
    None,
}

impl StorageLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageLocation::Hot => "hot",
            StorageLocation::Cold => "cold",
            StorageLocation::None => "none",
        }
    }

    fn from_sql(col: usize, s: &str) -> Result<Self, rusqlite::Error> {
        match s {
            "hot" => Ok(StorageLocation::Hot),
            "cold" => Ok(StorageLocation::Cold),
            "none" => Ok(StorageLocation::None),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                format!("unknown storage location: {other}").into(),
            )),
        }
    }
}

/// Durable-tier metadata record for a rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPage {
    pub normalized_url: NormalizedUrl,
    pub size_bytes: u64,
    pub first_rendered_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub storage_location: StorageLocation,
}

const PAGE_COLUMNS: &str =
    "normalized_url, size_bytes, first_rendered_at, last_accessed_at, access_count, storage_location";

fn row_to_page(row: &rusqlite::Row<'_>) -> Result<CachedPage, rusqlite::Error> {
    Ok(CachedPage {
        normalized_url: NormalizedUrl::from_stored(row.get(0)?),
        size_bytes: row.get::<_, i64>(1)? as u64,
        first_rendered_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        last_accessed_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        access_count: row.get::<_, i64>(4)? as u64,
        storage_location: StorageLocation::from_sql(5, &row.get::<_, String>(5)?)?,
    })
}

impl MetaDb {
    /// Look up page metadata by normalized URL.
    pub async fn find_page(&self, url: &NormalizedUrl) -> Result<Option<CachedPage>, Error> {
        let url = url.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedPage>, Error> {
                let mut stmt =
                    conn.prepare(&format!("SELECT {PAGE_COLUMNS} FROM cached_pages WHERE normalized_url = ?1"))?;
                match stmt.query_row(params![url], row_to_page) {
                    Ok(p) => Ok(Some(p)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Record a successful render.
    ///
    /// Creates the row on first write. On re-render, size and storage
    /// location are overwritten but the first-rendered timestamp and the
    /// access counter are preserved; those only change through
    /// [`MetaDb::touch_page`].
    pub async fn record_render(
        &self, url: &NormalizedUrl, size_bytes: u64, location: StorageLocation, now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let url = url.as_str().to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cached_pages (
                        normalized_url, size_bytes, first_rendered_at,
                        last_accessed_at, access_count, storage_location
                    ) VALUES (?1, ?2, ?3, ?3, 0, ?4)
                    ON CONFLICT(normalized_url) DO UPDATE SET
                        size_bytes = excluded.size_bytes,
                        last_accessed_at = excluded.last_accessed_at,
                        storage_location = excluded.storage_location",
                    params![url, size_bytes as i64, now, location.as_str()],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Bump access stats for a cache hit.
    ///
    /// Returns false when no metadata row exists for the URL.
    pub async fn touch_page(&self, url: &NormalizedUrl, now: DateTime<Utc>) -> Result<bool, Error> {
        let url = url.as_str().to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "UPDATE cached_pages
                     SET access_count = access_count + 1, last_accessed_at = ?2
                     WHERE normalized_url = ?1",
                    params![url, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete page metadata. Returns the number of rows removed (0 or 1).
    pub async fn delete_page(&self, url: &NormalizedUrl) -> Result<u64, Error> {
        let url = url.as_str().to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let deleted = conn.execute("DELETE FROM cached_pages WHERE normalized_url = ?1", params![url])?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
