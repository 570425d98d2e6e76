//! Document flow - workflow layer
//!
//! The full life of one code inside a run:
//!
//! 1. fetch detail page, PDF report, attachments
//! 2. upload to object storage
//! 3. classify (success / partial / failed)
//! 4. write attachment rows and the terminal status
//!
//! Never returns an error: every per-code problem ends up as a recorded
//! status, and status-table failures are reported as bookkeeping failures.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clients::ScrapeStateStore;
use crate::models::ScrapeStatus;
use crate::services::{DocumentFetcher, StorageWriter};
use crate::workflow::classify::{self, Outcome};
use crate::workflow::document_ctx::DocumentCtx;

/// What one code contributed to the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub code: String,
    pub status: ScrapeStatus,
    pub parse_error: bool,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    /// Every status-table write went through
    pub bookkeeping_ok: bool,
}

pub struct DocumentFlow {
    fetcher: DocumentFetcher,
    writer: StorageWriter,
    state: Arc<dyn ScrapeStateStore>,
}

impl DocumentFlow {
    pub fn new(fetcher: DocumentFetcher, writer: StorageWriter, state: Arc<dyn ScrapeStateStore>) -> Self {
        Self {
            fetcher,
            writer,
            state,
        }
    }

    pub async fn run(&self, ctx: &DocumentCtx) -> DocumentReport {
        info!("{} 🔍 fetching documents", ctx);

        let mut report = DocumentReport {
            code: ctx.code.clone(),
            status: ScrapeStatus::Failed,
            parse_error: false,
            files_uploaded: 0,
            bytes_uploaded: 0,
            bookkeeping_ok: true,
        };

        // ========== Fetch + store ==========
        let outcome = match self.fetcher.fetch(&ctx.code).await {
            Err(e) => {
                let outcome = classify::fetch_failed(&e);
                if outcome.parse_error {
                    error!("{} ❌ portal layout mismatch: {}", ctx, e);
                } else {
                    warn!("{} ❌ fetch failed: {}", ctx, e);
                }
                outcome
            }
            Ok(fetched) => {
                let stored = self.writer.store(&ctx.code, &fetched).await;
                report.files_uploaded = stored.files.len();
                report.bytes_uploaded = stored.bytes_uploaded;

                if stored.main_stored() {
                    let records = stored.attachment_records();
                    if let Err(e) = self.state.record_attachments(&ctx.code, &records).await {
                        error!("{} failed to record {} attachment row(s): {}", ctx, records.len(), e);
                        report.bookkeeping_ok = false;
                    }
                }
                classify::stored(&fetched, &stored)
            }
        };

        // ========== Record ==========
        self.record(ctx, &outcome, &mut report).await;
        report.status = outcome.status;
        report.parse_error = outcome.parse_error;
        log_outcome(ctx, &outcome);
        report
    }

    async fn record(&self, ctx: &DocumentCtx, outcome: &Outcome, report: &mut DocumentReport) {
        if let Err(e) = self
            .state
            .record_outcome(&ctx.code, outcome.status, outcome.error.as_deref())
            .await
        {
            error!("{} failed to record status {}: {}", ctx, outcome.status, e);
            report.bookkeeping_ok = false;
        }
    }
}

fn log_outcome(ctx: &DocumentCtx, outcome: &Outcome) {
    match outcome.status {
        ScrapeStatus::Success => info!("{} ✅ success", ctx),
        ScrapeStatus::Partial => warn!(
            "{} ⚠️ partial: {}",
            ctx,
            outcome.error.as_deref().unwrap_or("-")
        ),
        status => warn!("{} ❌ {}", ctx, status),
    }
}
