//! Render-job table: admission with dedup, lifecycle transitions, lookups.
//!
//! The state machine is `queued -> processing -> {completed | failed}`,
//! with failed attempts optionally requeued by the retry policy. The
//! partial unique index `ux_render_jobs_active` guarantees at most one
//! non-terminal job per normalized URL, which is what makes concurrent
//! admissions collapse onto a single job.

use super::connection::MetaDb;
use super::parse_ts;
use crate::{Error, NormalizedUrl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;
use uuid::Uuid;

/// Lifecycle state of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn from_sql(col: usize, s: &str) -> Result<Self, rusqlite::Error> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                format!("unknown job status: {other}").into(),
            )),
        }
    }
}

/// One render-and-cache-fill task for one normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: String,
    pub normalized_url: NormalizedUrl,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the dispatcher may (re)start this job; pushed into the
    /// future by retry backoff.
    pub next_attempt_at: DateTime<Utc>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub html_size_bytes: Option<u64>,
    pub render_duration_ms: Option<u64>,
}

impl RenderJob {
    /// Advisory progress percentage for pollers.
    ///
    /// Derived from elapsed processing time against the expected render
    /// duration; monotonically increasing and capped below 100 until the
    /// worker reports a terminal state. Never used for correctness.
    pub fn progress_percent(&self, now: DateTime<Utc>, expected: std::time::Duration) -> u8 {
        match self.status {
            JobStatus::Queued => 0,
            JobStatus::Completed | JobStatus::Failed => 100,
            JobStatus::Processing => {
                let Some(started) = self.started_at else { return 5 };
                let elapsed_ms = (now - started).num_milliseconds().max(0) as u128;
                let expected_ms = expected.as_millis().max(1);
                5 + (elapsed_ms * 90 / expected_ms).min(90) as u8
            }
        }
    }
}

/// Result of a job admission attempt. A pre-existing active job is the
/// normal dedup outcome, not an error.
#[derive(Debug, Clone)]
pub enum Admitted {
    /// No active job existed; a new one was queued.
    Created(RenderJob),
    /// An active job for the same URL already exists; share its id.
    Existing(RenderJob),
}

impl Admitted {
    pub fn job(&self) -> &RenderJob {
        match self {
            Admitted::Created(job) | Admitted::Existing(job) => job,
        }
    }
}

/// Per-status job totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

const JOB_COLUMNS: &str = "id, normalized_url, status, queued_at, started_at, completed_at, \
                           next_attempt_at, retry_count, error_message, html_size_bytes, render_duration_ms";

fn row_to_job(row: &rusqlite::Row<'_>) -> Result<RenderJob, rusqlite::Error> {
    let started_at: Option<String> = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;
    Ok(RenderJob {
        id: row.get(0)?,
        normalized_url: NormalizedUrl::from_stored(row.get(1)?),
        status: JobStatus::from_sql(2, &row.get::<_, String>(2)?)?,
        queued_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        started_at: started_at.as_deref().map(|s| parse_ts(4, s)).transpose()?,
        completed_at: completed_at.as_deref().map(|s| parse_ts(5, s)).transpose()?,
        next_attempt_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        retry_count: row.get::<_, i64>(7)? as u32,
        error_message: row.get(8)?,
        html_size_bytes: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        render_duration_ms: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
    })
}

fn find_active_in_tx(tx: &rusqlite::Connection, url: &str) -> Result<Option<RenderJob>, rusqlite::Error> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM render_jobs
         WHERE normalized_url = ?1 AND status IN ('queued', 'processing')"
    ))?;
    match stmt.query_row(params![url], row_to_job) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

impl MetaDb {
    /// Admit a render job for a URL, deduplicating against active jobs.
    ///
    /// The insert and the existence check run in one transaction against
    /// the partial unique index, so two concurrent admissions for the same
    /// URL cannot both create a job: one creates, the other observes the
    /// created job and returns it as [`Admitted::Existing`].
    pub async fn admit_job(&self, url: &NormalizedUrl, now: DateTime<Utc>) -> Result<Admitted, Error> {
        let url = url.as_str().to_string();
        let id = Uuid::new_v4().to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Admitted, Error> {
                let tx = conn.transaction()?;

                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO render_jobs
                         (id, normalized_url, status, queued_at, next_attempt_at, retry_count)
                     VALUES (?1, ?2, 'queued', ?3, ?3, 0)",
                    params![id, url, now],
                )?;

                let job = find_active_in_tx(&tx, &url)?.ok_or_else(|| {
                    // Only reachable if the table is modified outside the
                    // state machine mid-transaction.
                    Error::Database(tokio_rusqlite::Error::Error(rusqlite::Error::QueryReturnedNoRows))
                })?;
                tx.commit()?;

                if inserted == 1 {
                    Ok(Admitted::Created(job))
                } else {
                    Ok(Admitted::Existing(job))
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Find a job by id.
    pub async fn find_job(&self, id: &str) -> Result<Option<RenderJob>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<RenderJob>, Error> {
                let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM render_jobs WHERE id = ?1"))?;
                match stmt.query_row(params![id], row_to_job) {
                    Ok(job) => Ok(Some(job)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Find the non-terminal job for a URL, if any.
    pub async fn find_active_job(&self, url: &NormalizedUrl) -> Result<Option<RenderJob>, Error> {
        let url = url.as_str().to_string();
        self.conn
            .call(move |conn| find_active_in_tx(conn, &url).map_err(Error::from))
            .await
            .map_err(Error::from)
    }

    /// Queued jobs whose next attempt is due, oldest first.
    pub async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RenderJob>, Error> {
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Vec<RenderJob>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM render_jobs
                     WHERE status = 'queued' AND next_attempt_at <= ?1
                     ORDER BY queued_at ASC
                     LIMIT ?2"
                ))?;
                let jobs = stmt
                    .query_map(params![now, limit as i64], row_to_job)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await
            .map_err(Error::from)
    }

    /// Job counts per status, for operational logging.
    pub async fn job_counts(&self) -> Result<JobCounts, Error> {
        self.conn
            .call(|conn| -> Result<JobCounts, Error> {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM render_jobs GROUP BY status")?;
                let mut counts = JobCounts::default();
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?;
                for row in rows {
                    let (status, count) = row?;
                    match JobStatus::from_sql(0, &status)? {
                        JobStatus::Queued => counts.queued = count,
                        JobStatus::Processing => counts.processing = count,
                        JobStatus::Completed => counts.completed = count,
                        JobStatus::Failed => counts.failed = count,
                    }
                }
                Ok(counts)
            })
            .await
            .map_err(Error::from)
    }

    /// Claim a queued job for processing. Records `started_at`.
    ///
    /// Compare-and-set on status, so only one of several dispatchers
    /// claims any given job. Returns false when the job was not queued.
    pub async fn start_job(&self, id: &str, now: DateTime<Utc>) -> Result<bool, Error> {
        let id = id.to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "UPDATE render_jobs SET status = 'processing', started_at = ?2
                     WHERE id = ?1 AND status = 'queued'",
                    params![id, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a processing job completed, recording output size and duration.
    ///
    /// Returns the updated job, or None when the job was not processing
    /// (invalid transition, treated as a stale report and ignored).
    pub async fn complete_job(
        &self, id: &str, size_bytes: u64, duration_ms: u64, now: DateTime<Utc>,
    ) -> Result<Option<RenderJob>, Error> {
        let id = id.to_string();
        let now = now.to_rfc3339();
        self.conn
            .call(move |conn| -> Result<Option<RenderJob>, Error> {
                let changed = conn.execute(
                    "UPDATE render_jobs
                     SET status = 'completed', completed_at = ?2,
                         html_size_bytes = ?3, render_duration_ms = ?4
                     WHERE id = ?1 AND status = 'processing'",
                    params![id, now, size_bytes as i64, duration_ms as i64],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM render_jobs WHERE id = ?1"))?;
                Ok(Some(stmt.query_row(params![id], row_to_job)?))
            })
            .await
            .map_err(Error::from)
    }

    /// Mark a processing job failed, incrementing the retry counter.
    ///
    /// With `requeue_at` set the job goes back to `queued` for another
    /// attempt after the backoff deadline; otherwise it is terminal.
    /// Returns the updated job, or None for an invalid transition.
    pub async fn fail_job(
        &self, id: &str, error_message: &str, requeue_at: Option<DateTime<Utc>>, now: DateTime<Utc>,
    ) -> Result<Option<RenderJob>, Error> {
        let id = id.to_string();
        let error_message = error_message.to_string();
        let now = now.to_rfc3339();
        let requeue_at = requeue_at.map(|t| t.to_rfc3339());
        self.conn
            .call(move |conn| -> Result<Option<RenderJob>, Error> {
                let changed = match &requeue_at {
                    Some(next) => conn.execute(
                        "UPDATE render_jobs
                         SET status = 'queued', retry_count = retry_count + 1,
                             error_message = ?2, next_attempt_at = ?3, started_at = NULL
                         WHERE id = ?1 AND status = 'processing'",
                        params![id, error_message, next],
                    )?,
                    None => conn.execute(
                        "UPDATE render_jobs
                         SET status = 'failed', retry_count = retry_count + 1,
                             error_message = ?2, completed_at = ?3
                         WHERE id = ?1 AND status = 'processing'",
                        params![id, error_message, now],
                    )?,
                };
                if changed == 0 {
                    return Ok(None);
                }
                let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM render_jobs WHERE id = ?1"))?;
                Ok(Some(stmt.query_row(params![id], row_to_job)?))
            })
            .await
            .map_err(Error::from)
    }
}
