//! Application wiring
//!
//! Builds every client from [`Config`] and owns the [`BatchRunner`]. Any
//! failure here is a setup failure and ends the process with a non-zero
//! exit code.

use crate::clients::{D1Client, ObjectStore, PortalClient, R2ObjectStore, ScrapeStateStore};
use crate::config::Config;
use crate::infrastructure::RateLimiter;
use crate::orchestrator::batch_runner::{BatchRunner, RunSummary};
use crate::services::{DocumentFetcher, PortalPages, StorageWriter};
use crate::utils::logging::{log_startup, print_final_stats};
use crate::workflow::DocumentFlow;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub struct App {
    config: Config,
    runner: BatchRunner,
}

impl App {
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let (delay_min, delay_max) = config.delay_range();
        let limiter = Arc::new(RateLimiter::new(config.max_concurrent, delay_min, delay_max));

        let transport = PortalClient::new(config.request_timeout())
            .context("failed to build the portal HTTP client")?;
        let pages = PortalPages::new(&config.portal_base_url)
            .with_context(|| format!("invalid PORTAL_BASE_URL '{}'", config.portal_base_url))?;
        let fetcher = DocumentFetcher::new(Arc::new(transport), limiter, pages, config.max_file_bytes);

        let writer = match &config.r2 {
            Some(r2) => {
                let store: Arc<dyn ObjectStore> = Arc::new(R2ObjectStore::new(&config.cf_account_id, r2));
                info!("🪣 R2 bucket: {}", r2.bucket);
                StorageWriter::new(store, config.dry_run)
            }
            None => StorageWriter::dry_run_only(),
        };

        let d1 = D1Client::new(&config).context("failed to build the D1 client")?;
        d1.ping().await.context("D1 connectivity check failed")?;
        info!("✓ D1 reachable");

        let state: Arc<dyn ScrapeStateStore> = Arc::new(d1);
        let flow = Arc::new(DocumentFlow::new(fetcher, writer, state.clone()));
        let runner = BatchRunner::new(flow, state, &config);

        Ok(Self { config, runner })
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let summary = self.runner.run().await?;
        print_final_stats(&summary, self.config.dry_run);
        Ok(summary)
    }
}
