//! Terminal status of one code
//!
//! Pure functions over what the fetcher and the storage writer reported.

use crate::error::FetchError;
use crate::models::{FetchResult, ScrapeStatus};
use crate::services::StorageResult;

/// What gets written to `document_scrapes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ScrapeStatus,
    pub error: Option<String>,
    /// The portal page did not look like we expect
    pub parse_error: bool,
}

/// The main PDF never arrived.
pub fn fetch_failed(err: &FetchError) -> Outcome {
    Outcome {
        status: ScrapeStatus::Failed,
        error: Some(format!("[{}] {}", err.kind(), err)),
        parse_error: matches!(err, FetchError::Parse { .. }),
    }
}

/// The main PDF arrived; storage decides the rest.
pub fn stored(fetch: &FetchResult, stored: &StorageResult) -> Outcome {
    if let Err(e) = &stored.main {
        return Outcome {
            status: ScrapeStatus::Failed,
            error: Some(e.to_string()),
            parse_error: false,
        };
    }

    let mut problems = Vec::new();

    if let Some(e) = &fetch.attachment_listing_error {
        problems.push(format!("attachments page: {}", e));
    }
    for attachment in &fetch.attachments {
        if let Err(e) = &attachment.content {
            problems.push(format!("attachment {} download: {}", attachment.index, e));
        }
    }
    for upload in &stored.attachments {
        if let Err(e) = &upload.outcome {
            problems.push(format!("attachment {}: {}", upload.index, e));
        }
    }
    if let Some(e) = &stored.cleanup_error {
        problems.push(format!("earlier attachments: {}", e));
    }
    if let Some(Err(e)) = &stored.metadata {
        problems.push(format!("metadata: {}", e));
    }

    Outcome {
        status: ScrapeStatus::from_artifacts(true, problems.len()),
        error: if problems.is_empty() {
            None
        } else {
            Some(problems.join("; "))
        },
        parse_error: false,
    }
}
