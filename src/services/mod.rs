pub mod document_fetcher;
pub mod page_parser;
pub mod storage_writer;

pub use document_fetcher::DocumentFetcher;
pub use page_parser::PortalPages;
pub use storage_writer::{AttachmentUpload, StorageResult, StorageWriter};
