//! # mercadopublico scraper
//!
//! Batch job that downloads purchase-order PDFs (the PDF report plus its
//! attachments) from mercadopublico.cl, stores them in Cloudflare R2 and
//! tracks every code in Cloudflare D1.
//!
//! ## Architecture
//!
//! ### ① Infrastructure
//! - `infrastructure/` - shared, resource-owning building blocks
//! - `RateLimiter` - in-flight ceiling and randomized spacing between requests
//! - `RetryPolicy` - exponential backoff for the portal and D1
//!
//! ### ② Clients
//! - `clients/` - narrow seams to the outside world
//! - `PortalTransport` / `PortalClient` - HTTP GET with timeout and size ceiling
//! - `ObjectStore` / `R2ObjectStore` - object writes
//! - `ScrapeStateStore` / `D1Client` - claims and status writes
//!
//! ### ③ Services
//! - `PortalPages` - everything that knows the portal's HTML
//! - `DocumentFetcher` - code → downloaded PDFs
//! - `StorageWriter` - downloaded PDFs → `raw/{code}/...` objects
//!
//! ### ④ Workflow
//! - `DocumentFlow` - fetch → store → classify → record, for one code
//!
//! ### ⑤ Orchestration
//! - `BatchRunner` - claim, concurrency, run summary
//! - `App` - wiring from [`Config`]

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

pub use config::Config;
pub use models::{FetchResult, ScrapeStatus};
pub use orchestrator::{App, BatchRunner, RunSummary};
pub use workflow::{DocumentCtx, DocumentFlow, DocumentReport};
