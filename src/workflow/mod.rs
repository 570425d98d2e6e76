pub mod classify;
pub mod document_ctx;
pub mod document_flow;

pub use classify::Outcome;
pub use document_ctx::DocumentCtx;
pub use document_flow::{DocumentFlow, DocumentReport};
