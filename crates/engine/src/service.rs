//! Caller-facing render service.
//!
//! Composes the admission pipeline: SSRF guard, rate limiter, URL
//! normalizer, cache tier lookup, and job admission. Route handlers and
//! other transports are thin wrappers over this facade.

use std::time::Duration;

use chrono::Utc;
use prerender_core::{Admitted, AppConfig, Error, JobStatus, MetaDb, NormalizedUrl, RenderJob, keys, normalize, ssrf};

use crate::orchestrator::{CacheStatus, CacheTiers, InvalidateReport};
use crate::ratelimit::{RateLimitKey, RateLimitStatus, SlidingWindowLimiter, SubjectKind};

/// The caller on whose behalf an operation runs. Supplied by the
/// authentication layer before any core operation.
#[derive(Debug, Clone)]
pub struct Subject {
    pub kind: SubjectKind,
    pub id: String,
}

impl Subject {
    pub fn new(kind: SubjectKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// Outcome of a render request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Content is already cached in some tier; no job needed.
    Ready { status: CacheStatus },
    /// A render job is in flight (newly created or shared with earlier
    /// requesters). Poll it by id.
    Pending { job_id: String, created: bool, progress_percent: u8 },
}

/// Job state plus, on completion, where to retrieve the content.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: RenderJob,
    pub progress_percent: u8,
    pub content_location: Option<ContentLocation>,
}

/// Keys at which completed content is retrievable.
#[derive(Debug, Clone)]
pub struct ContentLocation {
    pub cache_key: String,
    pub storage_key: String,
}

/// Front door for render requests and status queries.
pub struct RenderService {
    tiers: CacheTiers,
    db: MetaDb,
    limiter: SlidingWindowLimiter,
    rate_limit: u32,
    rate_window: Duration,
}

impl RenderService {
    pub fn new(config: &AppConfig, tiers: CacheTiers, db: MetaDb) -> Self {
        Self {
            tiers,
            db,
            limiter: SlidingWindowLimiter::new(),
            rate_limit: config.rate_limit,
            rate_window: config.rate_limit_window(),
        }
    }

    /// Request rendered content for a URL.
    ///
    /// Pipeline: SSRF validation, rate limiting (the attempt is charged
    /// even when denied), normalization, cache lookup. A full miss admits
    /// a render job; an in-flight job is shared, never duplicated.
    pub async fn request_render(&self, raw_url: &str, subject: &Subject) -> Result<RequestOutcome, Error> {
        ssrf::validate(raw_url)?;
        self.charge("render", subject).await?;
        let url = normalize::normalize(raw_url)?;

        match self.tiers.lookup(&url).await? {
            status @ (CacheStatus::Hot { .. } | CacheStatus::Cold { .. }) => {
                self.touch_best_effort(&url).await;
                Ok(RequestOutcome::Ready { status })
            }
            CacheStatus::Rendering { job_id, progress_percent } => {
                Ok(RequestOutcome::Pending { job_id, created: false, progress_percent })
            }
            CacheStatus::None => {
                let admitted = self.db.admit_job(&url, Utc::now()).await?;
                let created = matches!(admitted, Admitted::Created(_));
                let job = admitted.job();
                tracing::info!(url = %url, job_id = %job.id, created, "render job admitted");
                Ok(RequestOutcome::Pending { job_id: job.id.clone(), created, progress_percent: 0 })
            }
        }
    }

    /// Cache status for a URL. Absence is `CacheStatus::None`, never an
    /// error; no quota is charged for status reads.
    pub async fn page_status(&self, raw_url: &str) -> Result<CacheStatus, Error> {
        let url = normalize::normalize(raw_url)?;
        self.tiers.lookup(&url).await
    }

    /// State of a job by id, with retrieval location once completed.
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobReport>, Error> {
        let Some(job) = self.db.find_job(job_id).await? else {
            return Ok(None);
        };

        let content_location = (job.status == JobStatus::Completed).then(|| ContentLocation {
            cache_key: keys::cache_key(&job.normalized_url),
            storage_key: keys::storage_key(&job.normalized_url),
        });

        Ok(Some(JobReport {
            progress_percent: job.progress_percent(Utc::now(), self.tiers.render_timeout()),
            content_location,
            job,
        }))
    }

    /// Drop a URL from every cache tier. Rate-limited under its own
    /// action so bulk purges cannot starve render quota.
    pub async fn invalidate(&self, raw_url: &str, subject: &Subject) -> Result<InvalidateReport, Error> {
        self.charge("invalidate", subject).await?;
        let url = normalize::normalize(raw_url)?;
        let report = self.tiers.invalidate(&url).await?;
        tracing::info!(url = %url, cleared_hot = report.cleared_hot, cleared_cold = report.cleared_cold,
            freed_bytes = report.freed_bytes, "cache invalidated");
        Ok(report)
    }

    /// Current quota state for a subject/action, without charging.
    pub async fn rate_limit_status(&self, action: &str, subject: &Subject) -> RateLimitStatus {
        let key = RateLimitKey::new(action, subject.kind, subject.id.clone());
        self.limiter.peek_status(&key, self.rate_limit, self.rate_window).await
    }

    async fn charge(&self, action: &str, subject: &Subject) -> Result<(), Error> {
        let key = RateLimitKey::new(action, subject.kind, subject.id.clone());
        let status = self.limiter.check_and_increment(&key, self.rate_limit, self.rate_window).await;
        if status.allowed {
            Ok(())
        } else {
            tracing::warn!(%key, used = status.used, limit = status.limit, "rate limit exceeded");
            Err(Error::RateLimited {
                limit: status.limit,
                used: status.used,
                remaining: status.remaining,
                reset_at: status.reset_at,
            })
        }
    }

    async fn touch_best_effort(&self, url: &NormalizedUrl) {
        if let Err(e) = self.tiers.touch(url).await {
            tracing::warn!(url = %url, error = %e, "access-stats update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryContentStore, MemoryFastTier};
    use bytes::Bytes;
    use std::sync::Arc;

    async fn service(limit: u32) -> (RenderService, CacheTiers) {
        let config = AppConfig { rate_limit: limit, ..Default::default() };
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(
            Arc::new(MemoryFastTier::new(64)),
            Some(Arc::new(MemoryContentStore::new())),
            db.clone(),
            config.render_timeout(),
        );
        (RenderService::new(&config, tiers.clone(), db), tiers)
    }

    fn caller() -> Subject {
        Subject::new(SubjectKind::ApiKey, "k-1")
    }

    #[tokio::test]
    async fn test_full_miss_admits_job() {
        let (service, _) = service(100).await;

        let outcome = service.request_render("https://example.com/a", &caller()).await.unwrap();
        match outcome {
            RequestOutcome::Pending { created, progress_percent, .. } => {
                assert!(created);
                assert_eq!(progress_percent, 0);
            }
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeat_request_shares_job() {
        let (service, _) = service(100).await;

        let first = service.request_render("https://example.com/a", &caller()).await.unwrap();
        let second = service.request_render("https://example.com/a", &caller()).await.unwrap();

        let (RequestOutcome::Pending { job_id: id1, created: c1, .. }, RequestOutcome::Pending { job_id: id2, created: c2, .. }) =
            (first, second)
        else {
            panic!("expected pending outcomes");
        };
        assert!(c1);
        assert!(!c2);
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn test_equivalent_urls_share_job() {
        let (service, _) = service(100).await;

        let first = service
            .request_render("HTTP://Example.com/Path/?utm_source=x&b=2&a=1", &caller())
            .await
            .unwrap();
        let second = service
            .request_render("https://example.com/Path?a=1&b=2", &caller())
            .await
            .unwrap();

        let (RequestOutcome::Pending { job_id: id1, .. }, RequestOutcome::Pending { job_id: id2, .. }) = (first, second)
        else {
            panic!("expected pending outcomes");
        };
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn test_cached_url_is_ready_and_touched() {
        let (service, tiers) = service(100).await;
        let url = normalize::normalize("https://example.com/a").unwrap();
        tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();

        let outcome = service.request_render("https://example.com/a", &caller()).await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Ready { status: CacheStatus::Hot { .. } }));

        match tiers.lookup(&url).await.unwrap() {
            CacheStatus::Hot { page } => assert_eq!(page.unwrap().access_count, 1),
            other => panic!("expected hot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blocked_target_rejected_before_charge() {
        let (service, _) = service(2).await;

        for _ in 0..5 {
            let err = service
                .request_render("http://169.254.169.254/latest/meta-data", &caller())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::BlockedTarget(_)));
        }

        // SSRF rejections never consumed quota
        let status = service.rate_limit_status("render", &caller()).await;
        assert_eq!(status.used, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_carries_reset() {
        let (service, _) = service(2).await;

        service.request_render("https://example.com/1", &caller()).await.unwrap();
        service.request_render("https://example.com/2", &caller()).await.unwrap();
        let err = service.request_render("https://example.com/3", &caller()).await.unwrap_err();

        match err {
            Error::RateLimited { limit, used, remaining, .. } => {
                assert_eq!(limit, 2);
                assert_eq!(used, 3);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected rate limited, got {other}"),
        }

        // denied attempt was still charged
        let status = service.rate_limit_status("render", &caller()).await;
        assert_eq!(status.used, 3);
    }

    #[tokio::test]
    async fn test_page_status_none_for_unknown() {
        let (service, _) = service(100).await;
        assert!(matches!(
            service.page_status("https://example.com/unknown").await.unwrap(),
            CacheStatus::None
        ));
    }

    #[tokio::test]
    async fn test_job_status_unknown_is_none() {
        let (service, _) = service(100).await;
        assert!(service.job_status("no-such-job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_status_completed_has_location() {
        let (service, _) = service(100).await;
        let outcome = service.request_render("https://example.com/a", &caller()).await.unwrap();
        let RequestOutcome::Pending { job_id, .. } = outcome else { panic!("expected pending") };

        let report = service.job_status(&job_id).await.unwrap().unwrap();
        assert!(report.content_location.is_none());

        service.db.start_job(&job_id, Utc::now()).await.unwrap();
        service.db.complete_job(&job_id, 7, 100, Utc::now()).await.unwrap();

        let report = service.job_status(&job_id).await.unwrap().unwrap();
        assert_eq!(report.progress_percent, 100);
        let location = report.content_location.unwrap();
        assert_eq!(location.cache_key, "render:v1:https://example.com/a");
        assert!(location.storage_key.starts_with("rendered/"));
    }

    #[tokio::test]
    async fn test_invalidate_reports_cleared_tiers() {
        let (service, tiers) = service(100).await;
        let url = normalize::normalize("https://example.com/a").unwrap();
        tiers.fill(&url, Bytes::from_static(b"0123456789"), 10).await.unwrap();

        let report = service.invalidate("https://example.com/a", &caller()).await.unwrap();
        assert!(report.cleared_hot);
        assert!(report.cleared_cold);
        assert_eq!(report.freed_bytes, 10);
    }

    #[tokio::test]
    async fn test_invalid_url_surfaced() {
        let (service, _) = service(100).await;
        let err = service.request_render("definitely not a url", &caller()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }
}
