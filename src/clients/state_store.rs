/// Status table seam
///
/// The batch runner only talks to the status tables through this trait.
use crate::error::StateStoreError;
use crate::models::{AttachmentRecord, ScrapeStatus};
use async_trait::async_trait;

#[async_trait]
pub trait ScrapeStateStore: Send + Sync {
    /// Claims up to `limit` reclaimable codes and marks them `in_progress`.
    ///
    /// Reclaimable: `pending`, or `failed` / `in_progress` whose last attempt
    /// is older than the staleness threshold, below the attempt cap. Oldest
    /// attempt first.
    async fn claim_pending(&self, limit: usize) -> Result<Vec<String>, StateStoreError>;

    /// Marks an explicit list of existing codes `in_progress`, whatever their
    /// status. Unknown codes are skipped.
    async fn claim_codes(&self, codes: &[String]) -> Result<Vec<String>, StateStoreError>;

    /// Writes the terminal status of a code. Last write wins.
    async fn record_outcome(
        &self,
        code: &str,
        status: ScrapeStatus,
        error: Option<&str>,
    ) -> Result<(), StateStoreError>;

    /// Replaces the attachment rows of a code.
    async fn record_attachments(
        &self,
        code: &str,
        attachments: &[AttachmentRecord],
    ) -> Result<(), StateStoreError>;
}
