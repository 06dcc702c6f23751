//! Cache tier orchestrator.
//!
//! Decides, for a normalized URL, whether rendered content is servable from
//! the fast tier, the durable tier, or must be (re)rendered, and owns all
//! writes to the durable page-metadata table. Check order in `lookup` is
//! fixed: fast tier first (cheapest, most current), durable metadata second
//! (fallback of record), job table last.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use prerender_core::{CachedPage, Error, MetaDb, NormalizedUrl, StorageLocation, keys};

use crate::store::{ContentStore, FastTier};

/// Cache state of one normalized URL.
#[derive(Debug, Clone)]
pub enum CacheStatus {
    /// Fast tier has the content. Durable metadata is attached when
    /// available, for display only; the fast tier stays authoritative.
    Hot { page: Option<CachedPage> },
    /// Only the durable tier knows this page.
    Cold { page: CachedPage },
    /// A non-terminal render job exists; poll it.
    Rendering { job_id: String, progress_percent: u8 },
    /// Nothing known about this URL.
    None,
}

/// Result of an invalidation, including partial failures.
#[derive(Debug, Clone, Default)]
pub struct InvalidateReport {
    pub cleared_hot: bool,
    pub cleared_cold: bool,
    /// From the durable metadata's recorded size, when it existed.
    pub freed_bytes: u64,
    /// Failures that did not stop the remaining deletions.
    pub errors: Vec<String>,
}

/// Result of a cache fill, including partial failures.
#[derive(Debug, Clone, Default)]
pub struct FillReport {
    pub fast_written: bool,
    pub durable_written: bool,
    pub errors: Vec<String>,
}

/// Orchestrates the fast tier, durable object store, and metadata table.
///
/// Constructed once with injected store handles and shared behind `Arc`;
/// all operations are safe under concurrent invocation. `content` is
/// `None` when no object store is configured, in which case durable
/// content operations are no-ops.
#[derive(Clone)]
pub struct CacheTiers {
    fast: Arc<dyn FastTier>,
    content: Option<Arc<dyn ContentStore>>,
    db: MetaDb,
    render_timeout: Duration,
}

impl CacheTiers {
    pub fn new(
        fast: Arc<dyn FastTier>, content: Option<Arc<dyn ContentStore>>, db: MetaDb, render_timeout: Duration,
    ) -> Self {
        Self { fast, content, db, render_timeout }
    }

    /// Cache state for a URL: fast tier, then durable metadata, then
    /// in-flight job, then [`CacheStatus::None`].
    ///
    /// An unreachable tier degrades to the next check instead of failing
    /// the lookup; a lookup only reports what it could still see.
    pub async fn lookup(&self, url: &NormalizedUrl) -> Result<CacheStatus, Error> {
        match self.fast.exists(&keys::cache_key(url)).await {
            Ok(true) => {
                let page = match self.db.find_page(url).await {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "metadata unavailable for hot entry");
                        None
                    }
                };
                return Ok(CacheStatus::Hot { page });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fast tier unavailable, falling through");
            }
        }

        match self.db.find_page(url).await {
            Ok(Some(page)) => return Ok(CacheStatus::Cold { page }),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "metadata unavailable, falling through");
            }
        }

        match self.db.find_active_job(url).await {
            Ok(Some(job)) => Ok(CacheStatus::Rendering {
                progress_percent: job.progress_percent(Utc::now(), self.render_timeout),
                job_id: job.id,
            }),
            Ok(None) => Ok(CacheStatus::None),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "job table unavailable, reporting none");
                Ok(CacheStatus::None)
            }
        }
    }

    /// Write a successful render into both tiers and record metadata.
    ///
    /// Failures in one tier never block the other; they are collected in
    /// the report. The fill as a whole fails only when no tier accepted
    /// the content.
    pub async fn fill(&self, url: &NormalizedUrl, html: Bytes, size_bytes: u64) -> Result<FillReport, Error> {
        let mut report = FillReport::default();

        match self.fast.set(&keys::cache_key(url), html.clone()).await {
            Ok(()) => report.fast_written = true,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fast tier fill failed");
                report.errors.push(format!("fast tier: {e}"));
            }
        }

        if let Some(content) = &self.content {
            match content.upload(&keys::storage_key(url), html).await {
                Ok(()) => report.durable_written = true,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "durable content fill failed");
                    report.errors.push(format!("content store: {e}"));
                }
            }
        }

        if !report.fast_written && !report.durable_written {
            return Err(Error::StorageUnavailable(format!("fill failed on all tiers for {url}")));
        }

        let location = if report.fast_written {
            StorageLocation::Hot
        } else if report.durable_written {
            StorageLocation::Cold
        } else {
            StorageLocation::None
        };

        if let Err(e) = self.db.record_render(url, size_bytes, location, Utc::now()).await {
            tracing::warn!(url = %url, error = %e, "metadata upsert failed after fill");
            report.errors.push(format!("metadata: {e}"));
        }

        Ok(report)
    }

    /// Remove a URL from every tier it occupies.
    ///
    /// Deletions are attempted independently; a durable-content failure
    /// does not stop the metadata row removal, it is reported instead.
    /// A missing content-store configuration is a no-op, not a failure.
    pub async fn invalidate(&self, url: &NormalizedUrl) -> Result<InvalidateReport, Error> {
        let mut report = InvalidateReport::default();

        match self.fast.delete(&keys::cache_key(url)).await {
            Ok(n) => report.cleared_hot = n > 0,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "fast tier delete failed");
                report.errors.push(format!("fast tier: {e}"));
            }
        }

        let page = match self.db.find_page(url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "metadata read failed during invalidate");
                report.errors.push(format!("metadata: {e}"));
                return Ok(report);
            }
        };
        if let Some(page) = page {
            report.freed_bytes = page.size_bytes;

            if let Some(content) = &self.content
                && let Err(e) = content.delete(&keys::storage_key(url)).await
            {
                tracing::warn!(url = %url, error = %e, "durable content delete failed");
                report.errors.push(format!("content store: {e}"));
            }

            match self.db.delete_page(url).await {
                Ok(n) => report.cleared_cold = n > 0,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "metadata delete failed during invalidate");
                    report.errors.push(format!("metadata: {e}"));
                }
            }
        }

        Ok(report)
    }

    /// Bump durable access stats for a cache hit.
    ///
    /// Best effort: callers must not fail a response over this.
    pub async fn touch(&self, url: &NormalizedUrl) -> Result<bool, Error> {
        self.db.touch_page(url, Utc::now()).await
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub fn render_timeout(&self) -> Duration {
        self.render_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryContentStore, MemoryFastTier};
    use prerender_core::normalize::normalize;

    const TIMEOUT: Duration = Duration::from_secs(30);

    struct DownFastTier;

    #[async_trait::async_trait]
    impl FastTier for DownFastTier {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, Error> {
            Err(Error::StorageUnavailable("fast tier offline".into()))
        }

        async fn set(&self, _key: &str, _value: Bytes) -> Result<(), Error> {
            Err(Error::StorageUnavailable("fast tier offline".into()))
        }

        async fn delete(&self, _key: &str) -> Result<u64, Error> {
            Err(Error::StorageUnavailable("fast tier offline".into()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, Error> {
            Err(Error::StorageUnavailable("fast tier offline".into()))
        }
    }

    struct DownContentStore;

    #[async_trait::async_trait]
    impl ContentStore for DownContentStore {
        async fn upload(&self, _key: &str, _value: Bytes) -> Result<(), Error> {
            Err(Error::StorageUnavailable("content store offline".into()))
        }

        async fn download(&self, _key: &str) -> Result<Option<Bytes>, Error> {
            Err(Error::StorageUnavailable("content store offline".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), Error> {
            Err(Error::StorageUnavailable("content store offline".into()))
        }
    }

    async fn tiers() -> (CacheTiers, Arc<MemoryFastTier>, Arc<MemoryContentStore>) {
        let fast = Arc::new(MemoryFastTier::new(64));
        let content = Arc::new(MemoryContentStore::new());
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(fast.clone(), Some(content.clone()), db, TIMEOUT);
        (tiers, fast, content)
    }

    #[tokio::test]
    async fn test_lookup_none() {
        let (tiers, _, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();
        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::None));
    }

    #[tokio::test]
    async fn test_fill_then_hot() {
        let (tiers, fast, content) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();

        let report = tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();
        assert!(report.fast_written);
        assert!(report.durable_written);
        assert!(report.errors.is_empty());

        assert!(fast.exists(&keys::cache_key(&url)).await.unwrap());
        assert!(content.download(&keys::storage_key(&url)).await.unwrap().is_some());

        match tiers.lookup(&url).await.unwrap() {
            CacheStatus::Hot { page } => {
                let page = page.expect("metadata attached");
                assert_eq!(page.size_bytes, 7);
                assert_eq!(page.storage_location, StorageLocation::Hot);
            }
            other => panic!("expected hot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_cold_after_fast_eviction() {
        let (tiers, fast, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();
        tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();

        fast.delete(&keys::cache_key(&url)).await.unwrap();

        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::Cold { .. }));
    }

    #[tokio::test]
    async fn test_lookup_rendering() {
        let (tiers, _, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();
        let admitted = tiers.db().admit_job(&url, Utc::now()).await.unwrap();

        match tiers.lookup(&url).await.unwrap() {
            CacheStatus::Rendering { job_id, progress_percent } => {
                assert_eq!(job_id, admitted.job().id);
                assert_eq!(progress_percent, 0);
            }
            other => panic!("expected rendering, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hot_takes_precedence_over_rendering() {
        let (tiers, _, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();

        tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();
        tiers.db().admit_job(&url, Utc::now()).await.unwrap();

        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::Hot { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_both_tiers() {
        let (tiers, _, content) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();
        tiers.fill(&url, Bytes::from_static(b"0123456789"), 10).await.unwrap();

        let report = tiers.invalidate(&url).await.unwrap();
        assert!(report.cleared_hot);
        assert!(report.cleared_cold);
        assert_eq!(report.freed_bytes, 10);
        assert!(report.errors.is_empty());

        assert!(content.download(&keys::storage_key(&url)).await.unwrap().is_none());
        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::None));
    }

    #[tokio::test]
    async fn test_invalidate_unknown_url() {
        let (tiers, _, _) = tiers().await;
        let url = normalize("https://example.com/never-seen").unwrap();

        let report = tiers.invalidate(&url).await.unwrap();
        assert!(!report.cleared_hot);
        assert!(!report.cleared_cold);
        assert_eq!(report.freed_bytes, 0);
    }

    #[tokio::test]
    async fn test_fill_without_content_store() {
        let fast = Arc::new(MemoryFastTier::new(64));
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(fast, None, db, TIMEOUT);
        let url = normalize("https://example.com/a").unwrap();

        let report = tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();
        assert!(report.fast_written);
        assert!(!report.durable_written);
        assert!(report.errors.is_empty());

        // invalidate with no content store is a no-op on the durable side
        let report = tiers.invalidate(&url).await.unwrap();
        assert!(report.cleared_hot);
        assert!(report.cleared_cold);
        assert_eq!(report.freed_bytes, 7);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_fill_reports_fast_tier_failure() {
        let content = Arc::new(MemoryContentStore::new());
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(Arc::new(DownFastTier), Some(content.clone()), db, TIMEOUT);
        let url = normalize("https://example.com/a").unwrap();

        let report = tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();
        assert!(!report.fast_written);
        assert!(report.durable_written);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("fast tier"));

        // content landed and metadata points at the durable tier
        assert!(content.download(&keys::storage_key(&url)).await.unwrap().is_some());
        let page = tiers.db().find_page(&url).await.unwrap().unwrap();
        assert_eq!(page.storage_location, StorageLocation::Cold);
    }

    #[tokio::test]
    async fn test_fill_reports_content_store_failure() {
        let fast = Arc::new(MemoryFastTier::new(64));
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(fast.clone(), Some(Arc::new(DownContentStore)), db, TIMEOUT);
        let url = normalize("https://example.com/a").unwrap();

        let report = tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap();
        assert!(report.fast_written);
        assert!(!report.durable_written);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("content store"));
        assert!(fast.exists(&keys::cache_key(&url)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fill_fails_when_no_tier_written() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(Arc::new(DownFastTier), Some(Arc::new(DownContentStore)), db, TIMEOUT);
        let url = normalize("https://example.com/a").unwrap();

        let err = tiers.fill(&url, Bytes::from_static(b"<html/>"), 7).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_lookup_degrades_to_cold_when_fast_tier_errors() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(Arc::new(DownFastTier), None, db, TIMEOUT);
        let url = normalize("https://example.com/a").unwrap();
        tiers
            .db()
            .record_render(&url, 7, StorageLocation::Cold, Utc::now())
            .await
            .unwrap();

        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::Cold { .. }));
    }

    #[tokio::test]
    async fn test_lookup_degrades_to_none_when_fast_tier_errors() {
        let db = MetaDb::open_in_memory().await.unwrap();
        let tiers = CacheTiers::new(Arc::new(DownFastTier), None, db, TIMEOUT);
        let url = normalize("https://example.com/unknown").unwrap();

        assert!(matches!(tiers.lookup(&url).await.unwrap(), CacheStatus::None));
    }

    #[tokio::test]
    async fn test_invalidate_collects_tier_failures() {
        let (tiers, fast, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();
        tiers.fill(&url, Bytes::from_static(b"0123456789"), 10).await.unwrap();

        // fast tier dies after the fill; metadata removal still proceeds
        let broken = CacheTiers::new(
            Arc::new(DownFastTier),
            Some(Arc::new(DownContentStore)),
            tiers.db().clone(),
            TIMEOUT,
        );
        let report = broken.invalidate(&url).await.unwrap();
        assert!(!report.cleared_hot);
        assert!(report.cleared_cold);
        assert_eq!(report.freed_bytes, 10);
        assert_eq!(report.errors.len(), 2);

        // the real fast tier still holds the orphan entry
        assert!(fast.exists(&keys::cache_key(&url)).await.unwrap());
    }

    #[tokio::test]
    async fn test_rerender_overwrites_size() {
        let (tiers, _, _) = tiers().await;
        let url = normalize("https://example.com/a").unwrap();

        tiers.fill(&url, Bytes::from_static(b"v1"), 2).await.unwrap();
        tiers.touch(&url).await.unwrap();
        tiers.fill(&url, Bytes::from_static(b"version2"), 8).await.unwrap();

        match tiers.lookup(&url).await.unwrap() {
            CacheStatus::Hot { page } => {
                let page = page.unwrap();
                assert_eq!(page.size_bytes, 8);
                assert_eq!(page.access_count, 1, "re-render preserves access stats");
            }
            other => panic!("expected hot, got {other:?}"),
        }
    }
}
