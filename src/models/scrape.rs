use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scrape status of one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    /// Seeded, never attempted
    Pending,
    /// Claimed by a run
    InProgress,
    /// Main PDF, every attachment and the metadata marker uploaded
    Success,
    /// Main PDF uploaded, something else did not
    Partial,
    /// Main PDF could not be fetched or uploaded
    Failed,
}

impl ScrapeStatus {
    /// Value stored in the status column
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::InProgress => "in_progress",
            ScrapeStatus::Success => "success",
            ScrapeStatus::Partial => "partial",
            ScrapeStatus::Failed => "failed",
        }
    }

    /// Terminal status implied by what made it to storage.
    ///
    /// `failed_sub_items` counts attachments (listing, download or upload)
    /// and the metadata marker that did not make it.
    pub fn from_artifacts(main_stored: bool, failed_sub_items: usize) -> Self {
        if !main_stored {
            ScrapeStatus::Failed
        } else if failed_sub_items > 0 {
            ScrapeStatus::Partial
        } else {
            ScrapeStatus::Success
        }
    }
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded attachment, as written to the `attachments` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub document_code: String,
    /// 1-based, discovery order
    pub sequence_index: usize,
    pub storage_key: String,
    pub file_size: u64,
    /// Hex SHA-256 of the uploaded bytes
    pub content_hash: Option<String>,
    pub filename: Option<String>,
    pub file_type: Option<String>,
}

/// `raw/{code}/metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeMetadata {
    pub code: String,
    pub fetched_at: DateTime<Utc>,
    pub source_url: String,
    pub pdf_report_url: String,
    pub attachment_count: usize,
    pub status: ScrapeStatus,
    /// Keys uploaded by this attempt, metadata excluded
    pub files: Vec<String>,
}
