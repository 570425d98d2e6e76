//! Document fetcher - service layer
//!
//! Turns a purchase-order code into downloaded bytes: detail page, PDF
//! report, attachments page, attachments. Every request passes through the
//! rate limiter and the retry policy; nothing here knows about storage or
//! the status table.

use crate::clients::{PortalResponse, PortalTransport};
use crate::error::FetchError;
use crate::infrastructure::{RateLimiter, RetryPolicy};
use crate::models::{AttachmentLink, FetchResult, FetchedAttachment};
use crate::services::page_parser::PortalPages;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// HTML pages are small; this only guards against runaway responses.
const MAX_PAGE_BYTES: u64 = 5 * 1024 * 1024;

/// How far into the body the `%PDF-` marker may appear
const PDF_MAGIC_WINDOW: usize = 1024;

pub struct DocumentFetcher {
    transport: Arc<dyn PortalTransport>,
    limiter: Arc<RateLimiter>,
    pages: PortalPages,
    retry: RetryPolicy,
    max_file_bytes: u64,
}

impl DocumentFetcher {
    pub fn new(
        transport: Arc<dyn PortalTransport>,
        limiter: Arc<RateLimiter>,
        pages: PortalPages,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            transport,
            limiter,
            pages,
            retry: RetryPolicy::portal(),
            max_file_bytes,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches everything published for `code`.
    ///
    /// Fails only when the main PDF cannot be obtained; attachment problems
    /// are reported inside the [`FetchResult`].
    pub async fn fetch(&self, code: &str) -> Result<FetchResult, FetchError> {
        let source_url = self.pages.detail_url(code);
        debug!("[code {}] fetching detail page {}", code, source_url);

        let detail = self.get(&source_url, MAX_PAGE_BYTES).await?;
        let links = self.pages.parse_detail_page(&detail.text(), &source_url)?;

        let main_pdf = self.download_pdf(&links.pdf_report_url).await?;
        info!("[code {}] PDF report downloaded ({} bytes)", code, main_pdf.len());

        let (attachments, attachment_listing_error) = match &links.attachments_url {
            None => (Vec::new(), None),
            Some(url) => match self.get(url, MAX_PAGE_BYTES).await {
                Ok(page) => {
                    let listed = self.pages.parse_attachments_page(&page.text(), url);
                    debug!("[code {}] {} attachment(s) listed", code, listed.len());
                    (self.download_attachments(code, listed).await, None)
                }
                Err(e) => {
                    warn!("[code {}] attachments page unavailable: {}", code, e);
                    (Vec::new(), Some(e))
                }
            },
        };

        Ok(FetchResult {
            code: code.to_string(),
            source_url,
            pdf_report_url: links.pdf_report_url,
            main_pdf,
            attachments,
            attachment_listing_error,
        })
    }

    async fn download_attachments(&self, code: &str, listed: Vec<AttachmentLink>) -> Vec<FetchedAttachment> {
        let mut attachments = Vec::with_capacity(listed.len());
        for (i, link) in listed.into_iter().enumerate() {
            let content = self.download_pdf(&link.url).await;
            if let Err(e) = &content {
                warn!("[code {}] attachment {} ({}) failed: {}", code, i + 1, link.filename, e);
            }
            attachments.push(FetchedAttachment {
                index: i + 1,
                filename: link.filename,
                file_type: link.file_type,
                url: link.url,
                content,
            });
        }
        attachments
    }

    async fn download_pdf(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.get(url, self.max_file_bytes).await?;
        ensure_pdf(url, &response)?;
        Ok(response.body)
    }

    /// One logical GET: rate limited, retried, status checked.
    async fn get(&self, url: &str, max_bytes: u64) -> Result<PortalResponse, FetchError> {
        self.retry
            .run(url, move |_| async move {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|_| FetchError::transient(url, "rate limiter closed"))?;
                let response = self.transport.get(url, max_bytes).await?;
                check_status(url, response)
            })
            .await
    }
}

/// Maps HTTP statuses onto the fetch error taxonomy.
pub fn check_status(url: &str, response: PortalResponse) -> Result<PortalResponse, FetchError> {
    match response.status {
        200..=299 => Ok(response),
        404 | 410 => Err(FetchError::NotFound {
            url: url.to_string(),
            status: response.status,
        }),
        408 | 429 | 500..=599 => Err(FetchError::TransientFetch {
            url: url.to_string(),
            message: format!("HTTP {}", response.status),
            retry_after: response.retry_after,
        }),
        400..=499 => Err(FetchError::NotFound {
            url: url.to_string(),
            status: response.status,
        }),
        status => Err(FetchError::transient(url, format!("unexpected HTTP {}", status))),
    }
}

/// Accepts bodies that carry the `%PDF-` marker near the start.
pub fn ensure_pdf(url: &str, response: &PortalResponse) -> Result<(), FetchError> {
    let head = &response.body[..response.body.len().min(PDF_MAGIC_WINDOW)];
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    if head[start..].starts_with(b"%PDF-") {
        return Ok(());
    }

    let content_type = response.content_type.as_deref().unwrap_or("unknown");
    Err(FetchError::invalid_content(
        url,
        format!(
            "expected a PDF, got {} ({} bytes)",
            content_type,
            response.body.len()
        ),
    ))
}
