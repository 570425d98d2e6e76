//! Per-code context
//!
//! Carries "which code, and where in the batch" through the logs.

use std::fmt::Display;

#[derive(Debug, Clone)]
pub struct DocumentCtx {
    /// Purchase-order code
    pub code: String,

    /// 1-based position in the batch (log display only)
    pub index: usize,

    pub total: usize,
}

impl DocumentCtx {
    pub fn new(code: impl Into<String>, index: usize, total: usize) -> Self {
        Self {
            code: code.into(),
            index,
            total,
        }
    }
}

impl Display for DocumentCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[code {} #{}/{}]", self.code, self.index, self.total)
    }
}
