//! Storage writer - service layer
//!
//! Uploads what the fetcher downloaded under the `raw/{code}/` prefix:
//!
//! ```text
//! raw/{code}/purchase_order.pdf
//! raw/{code}/attachment_1.pdf ... attachment_N.pdf   (discovery order)
//! raw/{code}/metadata.json                            (written last)
//! ```
//!
//! Attachment objects left by an earlier attempt and not rewritten by this
//! one are deleted before the metadata marker goes out, so the marker always
//! describes exactly what is under the prefix.
//!
//! Every upload is reported on its own; the writer never decides the final
//! status of a code, it only records what made it to storage.

use crate::clients::ObjectStore;
use crate::error::StorageError;
use crate::models::{AttachmentRecord, FetchResult, ScrapeMetadata, ScrapeStatus};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Outcome of one attachment upload
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub index: usize,
    pub key: String,
    pub outcome: Result<AttachmentRecord, StorageError>,
}

/// Per-artifact outcome of [`StorageWriter::store`]
#[derive(Debug, Clone)]
pub struct StorageResult {
    /// Key of the main PDF
    pub main: Result<String, StorageError>,
    /// Attachments that were downloaded and therefore attempted
    pub attachments: Vec<AttachmentUpload>,
    /// `None` when the main upload failed and the rest was skipped
    pub metadata: Option<Result<String, StorageError>>,
    /// Marker payload as built, also in dry-run
    pub metadata_record: Option<ScrapeMetadata>,
    /// Keys written (or that would have been written in dry-run)
    pub files: Vec<String>,
    /// Attachment objects of earlier attempts deleted by this one
    pub stale_removed: Vec<String>,
    /// Earlier attachment objects could not be listed or deleted
    pub cleanup_error: Option<StorageError>,
    pub bytes_uploaded: u64,
    pub dry_run: bool,
}

impl StorageResult {
    pub fn main_stored(&self) -> bool {
        self.main.is_ok()
    }

    /// Attachment uploads, cleanup and metadata upload that failed
    pub fn failed_writes(&self) -> usize {
        let attachments = self.attachments.iter().filter(|a| a.outcome.is_err()).count();
        let cleanup = self.cleanup_error.is_some() as usize;
        let metadata = matches!(self.metadata, Some(Err(_))) as usize;
        attachments + cleanup + metadata
    }

    /// Rows for the attachments table
    pub fn attachment_records(&self) -> Vec<AttachmentRecord> {
        self.attachments
            .iter()
            .filter_map(|a| a.outcome.as_ref().ok().cloned())
            .collect()
    }

    /// First upload error, if any
    pub fn first_error(&self) -> Option<&StorageError> {
        if let Err(e) = &self.main {
            return Some(e);
        }
        self.attachments
            .iter()
            .find_map(|a| a.outcome.as_ref().err())
            .or(self.cleanup_error.as_ref())
            .or_else(|| self.metadata.as_ref().and_then(|m| m.as_ref().err()))
    }
}

/// Writes documents to object storage, or only pretends to in dry-run.
pub struct StorageWriter {
    store: Option<Arc<dyn ObjectStore>>,
    dry_run: bool,
}

impl StorageWriter {
    pub fn new(store: Arc<dyn ObjectStore>, dry_run: bool) -> Self {
        Self {
            store: Some(store),
            dry_run,
        }
    }

    /// Dry-run writer with no backing store
    pub fn dry_run_only() -> Self {
        Self {
            store: None,
            dry_run: true,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.store.is_none()
    }

    pub async fn store(&self, code: &str, fetch: &FetchResult) -> StorageResult {
        let mut result = StorageResult {
            main: Err(StorageError::upload(main_pdf_key(code), "not attempted")),
            attachments: Vec::new(),
            metadata: None,
            metadata_record: None,
            files: Vec::new(),
            stale_removed: Vec::new(),
            cleanup_error: None,
            bytes_uploaded: 0,
            dry_run: self.is_dry_run(),
        };

        // ========== Main PDF ==========
        let main_key = main_pdf_key(code);
        match self.put(&main_key, fetch.main_pdf.clone(), PDF_CONTENT_TYPE).await {
            Ok(()) => {
                result.bytes_uploaded += fetch.main_pdf.len() as u64;
                result.files.push(main_key.clone());
                result.main = Ok(main_key);
            }
            Err(e) => {
                warn!("[code {}] main PDF upload failed, skipping the rest: {}", code, e);
                result.main = Err(e);
                return result;
            }
        }

        // ========== Attachments ==========
        for (attachment, bytes) in fetch.downloaded_attachments() {
            let key = attachment_key(code, attachment.index);
            let outcome = match self.put(&key, bytes.clone(), PDF_CONTENT_TYPE).await {
                Ok(()) => {
                    result.bytes_uploaded += bytes.len() as u64;
                    result.files.push(key.clone());
                    Ok(AttachmentRecord {
                        document_code: code.to_string(),
                        sequence_index: attachment.index,
                        storage_key: key.clone(),
                        file_size: bytes.len() as u64,
                        content_hash: Some(sha256_hex(bytes)),
                        filename: Some(attachment.filename.clone()),
                        file_type: attachment.file_type.clone(),
                    })
                }
                Err(e) => {
                    warn!("[code {}] attachment {} upload failed: {}", code, attachment.index, e);
                    Err(e)
                }
            };
            result.attachments.push(AttachmentUpload {
                index: attachment.index,
                key,
                outcome,
            });
        }

        // ========== Attachments of earlier attempts ==========
        let kept: Vec<String> = result
            .attachment_records()
            .into_iter()
            .map(|record| record.storage_key)
            .collect();
        match self.remove_stale_attachments(code, &kept).await {
            Ok(removed) => result.stale_removed = removed,
            Err(e) => {
                warn!("[code {}] earlier attachments could not be removed: {}", code, e);
                result.cleanup_error = Some(e);
            }
        }

        // ========== Metadata marker ==========
        let missing = fetch.failed_attachment_count()
            + fetch.attachment_listing_error.is_some() as usize
            + result.failed_writes();
        let metadata = ScrapeMetadata {
            code: code.to_string(),
            fetched_at: Utc::now(),
            source_url: fetch.source_url.clone(),
            pdf_report_url: fetch.pdf_report_url.clone(),
            attachment_count: result.attachment_records().len(),
            status: ScrapeStatus::from_artifacts(true, missing),
            files: result.files.clone(),
        };

        let metadata_key = metadata_key(code);
        let uploaded = match serde_json::to_vec_pretty(&metadata) {
            Ok(body) => {
                let size = body.len() as u64;
                self.put(&metadata_key, Bytes::from(body), JSON_CONTENT_TYPE)
                    .await
                    .map(|()| size)
            }
            Err(e) => Err(StorageError::upload(&metadata_key, e)),
        };
        match uploaded {
            Ok(size) => {
                result.bytes_uploaded += size;
                result.files.push(metadata_key.clone());
                result.metadata = Some(Ok(metadata_key));
            }
            Err(e) => {
                warn!("[code {}] metadata upload failed: {}", code, e);
                result.metadata = Some(Err(e));
            }
        }
        result.metadata_record = Some(metadata);

        info!(
            "[code {}] {} {} file(s), {} bytes",
            code,
            if result.dry_run { "would upload" } else { "uploaded" },
            result.files.len(),
            result.bytes_uploaded
        );
        result
    }

    /// Deletes the `attachment_*.pdf` objects of `code` that are not in `kept`.
    async fn remove_stale_attachments(&self, code: &str, kept: &[String]) -> Result<Vec<String>, StorageError> {
        let store = match &self.store {
            Some(store) if !self.dry_run => store,
            _ => return Ok(Vec::new()),
        };

        let prefix = document_prefix(code);
        let mut removed = Vec::new();
        for key in store.list(&prefix).await? {
            if is_attachment_key(&prefix, &key) && !kept.contains(&key) {
                store.delete(&key).await?;
                info!("[code {}] removed {} from an earlier attempt", code, key);
                removed.push(key);
            }
        }
        Ok(removed)
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        match &self.store {
            Some(store) if !self.dry_run => store.put(key, body, content_type).await,
            _ => {
                debug!("[dry-run] {} ({} bytes, {})", key, body.len(), content_type);
                Ok(())
            }
        }
    }
}

// ========== Key scheme ==========

/// Folder of a code in the bucket
pub fn document_prefix(code: &str) -> String {
    format!("raw/{}/", sanitize_code(code))
}

pub fn main_pdf_key(code: &str) -> String {
    format!("{}purchase_order.pdf", document_prefix(code))
}

pub fn attachment_key(code: &str, index: usize) -> String {
    format!("{}attachment_{}.pdf", document_prefix(code), index)
}

pub fn metadata_key(code: &str) -> String {
    format!("{}metadata.json", document_prefix(code))
}

fn is_attachment_key(prefix: &str, key: &str) -> bool {
    key.strip_prefix(prefix).map_or(false, |name| {
        name.starts_with("attachment_") && name.ends_with(".pdf") && !name.contains('/')
    })
}

/// Keeps a code from escaping its folder.
fn sanitize_code(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
