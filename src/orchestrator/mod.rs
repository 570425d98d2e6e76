//! Orchestration layer
//!
//! ```text
//! app (wiring, setup errors)
//!     ↓
//! batch_runner (claim, Vec<code>, concurrency, summary)
//!     ↓
//! workflow::DocumentFlow (one code)
//!     ↓
//! services (fetch / parse / store)
//!     ↓
//! clients + infrastructure (HTTP, R2, D1, rate limiter, retry)
//! ```
//!
//! Nothing in this layer inspects documents; it only schedules and counts.

pub mod app;
pub mod batch_runner;

pub use app::App;
pub use batch_runner::{BatchRunner, RunSummary};
