//! prerenderd entry point.
//!
//! Boots the metadata store, cache tiers, and job dispatcher. Logging
//! goes to stderr so stdout stays free for embedding transports.

use std::sync::Arc;

use anyhow::{Context, Result};
use prerender_core::{AppConfig, MetaDb};
use prerender_engine::{CacheTiers, Dispatcher, MemoryContentStore, MemoryFastTier};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(db_path = %config.db_path.display(), rate_limit = config.rate_limit, "starting prerenderd");

    let db = MetaDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening metadata db at {}", config.db_path.display()))?;

    let fast = Arc::new(MemoryFastTier::new(config.fast_tier_capacity));
    let content = config
        .storage_bucket
        .as_ref()
        .map(|bucket| {
            tracing::warn!(bucket = %bucket, "no object-store client built in; using in-memory content store, contents are lost on restart");
            Arc::new(MemoryContentStore::new()) as Arc<dyn prerender_engine::ContentStore>
        });
    let tiers = CacheTiers::new(fast, content, db.clone(), config.render_timeout());

    let dispatcher = Dispatcher::new(
        db.clone(),
        tiers,
        Arc::new(NoopWorker),
        config.retry_policy(),
        config.dispatch_interval(),
    );

    tokio::spawn({
        let db = db.clone();
        let interval = config.dispatch_interval();
        async move {
            loop {
                match db.job_counts().await {
                    Ok(counts) => tracing::info!(
                        queued = counts.queued,
                        processing = counts.processing,
                        completed = counts.completed,
                        failed = counts.failed,
                        "job queue"
                    ),
                    Err(e) => tracing::warn!(error = %e, "job count query failed"),
                }
                tokio::time::sleep(interval * 30).await;
            }
        }
    });

    dispatcher.run().await;

    Ok(())
}

/// Placeholder renderer until a browser-backed worker is wired in.
/// Every claimed job fails with a transient error and retries on the
/// standard backoff schedule.
struct NoopWorker;

#[async_trait::async_trait]
impl prerender_engine::RenderWorker for NoopWorker {
    async fn render(
        &self,
        _request: &prerender_engine::RenderRequest,
    ) -> Result<prerender_engine::RenderOutput, prerender_core::Error> {
        Err(prerender_core::Error::render_failed(
            prerender_core::RenderFailureKind::Other,
            "no render worker configured",
        ))
    }
}
