//! Batch runner - orchestration layer
//!
//! ## Responsibilities
//!
//! 1. **Claim**: take up to `batch_size` reclaimable codes, or the explicit
//!    list when one was given
//! 2. **Concurrency**: one tokio task per code, bounded by a `Semaphore`
//! 3. **Aggregation**: fold every [`DocumentReport`] into a [`RunSummary`]
//!
//! Per-code failures never abort the run. Only a failed claim does.

use crate::clients::ScrapeStateStore;
use crate::config::Config;
use crate::models::ScrapeStatus;
use crate::utils::logging::{log_claimed, log_progress};
use crate::workflow::{DocumentCtx, DocumentFlow, DocumentReport};
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Completed codes between two progress lines
const PROGRESS_EVERY: usize = 10;

/// Totals of one run. Logged, not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub claimed: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub parse_errors: usize,
    pub files_uploaded: usize,
    pub total_bytes: u64,
    pub bookkeeping_failures: usize,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.success + self.partial + self.failed
    }

    fn absorb(&mut self, report: &DocumentReport) {
        match report.status {
            ScrapeStatus::Success => self.success += 1,
            ScrapeStatus::Partial => self.partial += 1,
            _ => self.failed += 1,
        }
        if report.parse_error {
            self.parse_errors += 1;
        }
        if !report.bookkeeping_ok {
            self.bookkeeping_failures += 1;
        }
        self.files_uploaded += report.files_uploaded;
        self.total_bytes += report.bytes_uploaded;
    }
}

pub struct BatchRunner {
    flow: Arc<DocumentFlow>,
    state: Arc<dyn ScrapeStateStore>,
    batch_size: usize,
    max_concurrent: usize,
    codes: Option<Vec<String>>,
}

impl BatchRunner {
    pub fn new(flow: Arc<DocumentFlow>, state: Arc<dyn ScrapeStateStore>, config: &Config) -> Self {
        Self {
            flow,
            state,
            batch_size: config.batch_size,
            max_concurrent: config.max_concurrent.max(1),
            codes: config.codes.clone(),
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let codes = self.claim().await?;
        if codes.is_empty() {
            warn!("⚠️ nothing to scrape, exiting");
            return Ok(RunSummary::default());
        }

        log_claimed(codes.len(), self.max_concurrent);
        Ok(self.process_all(codes).await)
    }

    async fn claim(&self) -> Result<Vec<String>> {
        match &self.codes {
            Some(codes) => {
                info!("\n📋 claiming {} explicit code(s)...", codes.len());
                self.state
                    .claim_codes(codes)
                    .await
                    .context("failed to claim the explicit code list")
            }
            None => {
                info!("\n📋 claiming up to {} pending code(s)...", self.batch_size);
                self.state
                    .claim_pending(self.batch_size)
                    .await
                    .context("failed to claim pending codes")
            }
        }
    }

    async fn process_all(&self, codes: Vec<String>) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let total = codes.len();
        let mut summary = RunSummary {
            claimed: total,
            ..Default::default()
        };

        let mut running = FuturesUnordered::new();
        for (idx, code) in codes.into_iter().enumerate() {
            let ctx = DocumentCtx::new(code.clone(), idx + 1, total);
            let flow = self.flow.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                flow.run(&ctx).await
            });
            running.push(async move { (code, handle.await) });
        }

        while let Some((code, joined)) = running.next().await {
            match joined {
                Ok(report) => summary.absorb(&report),
                Err(e) => {
                    error!("[code {}] task aborted: {}", code, e);
                    summary.failed += 1;
                    let message = format!("task aborted: {}", e);
                    if let Err(e) = self
                        .state
                        .record_outcome(&code, ScrapeStatus::Failed, Some(&message))
                        .await
                    {
                        error!("[code {}] failed to record aborted task: {}", code, e);
                        summary.bookkeeping_failures += 1;
                    }
                }
            }

            let done = summary.completed();
            if done % PROGRESS_EVERY == 0 && done < total {
                log_progress(done, total, &summary);
            }
        }

        summary
    }
}
