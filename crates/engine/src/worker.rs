//! Render-worker contract and job dispatch.
//!
//! The headless-browser worker itself lives outside this crate; it
//! implements [`RenderWorker`] and is handed a [`RenderRequest`] per job.
//! The dispatcher owns everything around that call: claiming due jobs,
//! re-validating the target against the SSRF guard at the point of fetch,
//! enforcing the mandatory timeout, routing success into the cache fill,
//! and applying the retry policy to failures.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use prerender_core::{Error, MetaDb, NormalizedUrl, RenderFailureKind, RenderJob, RetryPolicy, ssrf};

use crate::orchestrator::CacheTiers;

/// Job descriptor handed to the worker.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub job_id: String,
    pub normalized_url: NormalizedUrl,
    /// Mandatory bound on the outbound fetch/render. The dispatcher
    /// enforces it independently of the worker's own behavior.
    pub timeout: Duration,
}

/// Successful render result.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub html: Bytes,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

/// External renderer executing one job at a time.
///
/// Failures should be reported as [`Error::RenderFailed`] with a kind that
/// distinguishes timeouts from other failures; any other error variant is
/// treated as an unclassified failure.
#[async_trait::async_trait]
pub trait RenderWorker: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput, Error>;
}

/// Claims due jobs and drives them through the state machine.
#[derive(Clone)]
pub struct Dispatcher {
    db: MetaDb,
    tiers: CacheTiers,
    worker: Arc<dyn RenderWorker>,
    retry: RetryPolicy,
    batch_size: usize,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        db: MetaDb, tiers: CacheTiers, worker: Arc<dyn RenderWorker>, retry: RetryPolicy, poll_interval: Duration,
    ) -> Self {
        Self { db, tiers, worker, retry, batch_size: 8, poll_interval }
    }

    /// Poll loop: claim and execute due jobs until the task is aborted.
    pub async fn run(&self) {
        loop {
            match self.run_once(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(jobs = n, "dispatch pass complete"),
                Err(e) => tracing::error!(error = %e, "dispatch pass failed"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Execute every due job once. Returns how many jobs were claimed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize, Error> {
        let due = self.db.due_jobs(now, self.batch_size).await?;
        let mut claimed = 0;
        for job in due {
            // compare-and-set; another dispatcher may have taken it
            if self.db.start_job(&job.id, Utc::now()).await? {
                claimed += 1;
                self.execute(&job).await?;
            }
        }
        Ok(claimed)
    }

    /// Run one claimed job through render, fill, and transition.
    async fn execute(&self, job: &RenderJob) -> Result<(), Error> {
        // Admission already validated the URL, but redirects and stale
        // queues mean the target must be re-checked at the point of fetch.
        if let Err(e) = ssrf::validate(job.normalized_url.as_str()) {
            tracing::warn!(job_id = %job.id, url = %job.normalized_url, error = %e, "job target blocked at dispatch");
            self.db
                .fail_job(&job.id, &e.to_string(), None, Utc::now())
                .await?;
            return Ok(());
        }

        let request = RenderRequest {
            job_id: job.id.clone(),
            normalized_url: job.normalized_url.clone(),
            timeout: self.tiers.render_timeout(),
        };

        let outcome = tokio::time::timeout(request.timeout, self.worker.render(&request)).await;

        match outcome {
            Ok(Ok(output)) => self.finish(job, output).await,
            Ok(Err(e)) => {
                let (kind, message) = match e {
                    Error::RenderFailed { kind, message } => (kind, message),
                    other => (RenderFailureKind::Other, other.to_string()),
                };
                self.handle_failure(job, kind, &message).await
            }
            Err(_) => {
                let message = format!("render timed out after {}ms", request.timeout.as_millis());
                self.handle_failure(job, RenderFailureKind::Timeout, &message).await
            }
        }
    }

    async fn finish(&self, job: &RenderJob, output: RenderOutput) -> Result<(), Error> {
        let completed = self
            .db
            .complete_job(&job.id, output.size_bytes, output.duration_ms, Utc::now())
            .await?;
        let Some(completed) = completed else {
            tracing::warn!(job_id = %job.id, "stale completion report ignored");
            return Ok(());
        };

        match self.tiers.fill(&completed.normalized_url, output.html, output.size_bytes).await {
            Ok(report) if report.errors.is_empty() => {
                tracing::info!(job_id = %job.id, url = %completed.normalized_url, size = output.size_bytes,
                    duration_ms = output.duration_ms, "render completed and cached");
            }
            Ok(report) => {
                tracing::warn!(job_id = %job.id, url = %completed.normalized_url, errors = ?report.errors,
                    "render completed, cache fill partial");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, url = %completed.normalized_url, error = %e,
                    "render completed but cache fill failed");
            }
        }
        Ok(())
    }

    async fn handle_failure(&self, job: &RenderJob, kind: RenderFailureKind, message: &str) -> Result<(), Error> {
        let failures = job.retry_count + 1;
        let requeue_at = if self.retry.should_retry(failures, kind) {
            let backoff = self.retry.backoff(failures);
            Some(Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::seconds(3600)))
        } else {
            None
        };

        match &requeue_at {
            Some(next) => tracing::warn!(job_id = %job.id, url = %job.normalized_url, %kind, message,
                retry_at = %next, "render failed, requeued"),
            None => tracing::error!(job_id = %job.id, url = %job.normalized_url, %kind, message,
                attempts = failures, "render failed terminally"),
        }

        self.db.fail_job(&job.id, message, requeue_at, Utc::now()).await?;
        Ok(())
    }
}
