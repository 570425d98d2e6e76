use crate::error::FetchError;
use bytes::Bytes;

/// Everything downloaded for one code
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub code: String,
    /// Detail page the links were extracted from
    pub source_url: String,
    pub pdf_report_url: String,
    pub main_pdf: Bytes,
    /// Discovery order
    pub attachments: Vec<FetchedAttachment>,
    /// Set when the attachments page was linked but could not be read
    pub attachment_listing_error: Option<FetchError>,
}

impl FetchResult {
    /// Attachments that downloaded and passed the content check
    pub fn downloaded_attachments(&self) -> impl Iterator<Item = (&FetchedAttachment, &Bytes)> {
        self.attachments
            .iter()
            .filter_map(|a| a.content.as_ref().ok().map(|bytes| (a, bytes)))
    }

    pub fn failed_attachment_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.content.is_err()).count()
    }
}

/// One attachment listed on the portal
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    /// 1-based, discovery order
    pub index: usize,
    pub filename: String,
    pub file_type: Option<String>,
    pub url: String,
    pub content: Result<Bytes, FetchError>,
}

/// Row of the portal's attachments table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentLink {
    pub filename: String,
    pub file_type: Option<String>,
    pub url: String,
}

/// Links found on a purchase-order detail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailLinks {
    pub pdf_report_url: String,
    pub attachments_url: Option<String>,
}
