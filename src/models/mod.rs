pub mod document;
pub mod scrape;

pub use document::{AttachmentLink, DetailLinks, FetchResult, FetchedAttachment};
pub use scrape::{AttachmentRecord, ScrapeMetadata, ScrapeStatus};
