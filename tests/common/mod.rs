//! In-process fakes for the three seams: portal, object store, status table.
//! `d1` serves the real D1 client from a local SQLite database.
#![allow(dead_code)]

pub mod d1;

use async_trait::async_trait;
use bytes::Bytes;
use mercadopublico_scraper::clients::{ObjectStore, PortalResponse, PortalTransport, ScrapeStateStore};
use mercadopublico_scraper::config::Config;
use mercadopublico_scraper::error::{FetchError, StateStoreError, StorageError};
use mercadopublico_scraper::infrastructure::{RateLimiter, RetryPolicy};
use mercadopublico_scraper::models::{AttachmentRecord, ScrapeStatus};
use mercadopublico_scraper::services::{DocumentFetcher, PortalPages, StorageWriter};
use mercadopublico_scraper::{BatchRunner, DocumentFlow};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const BASE: &str = "https://portal.test";

// ========== URLs as the portal publishes them ==========

pub fn detail_url(code: &str) -> String {
    format!("{}/PurchaseOrder/Modules/PO/DetailsPurchaseOrder.aspx?codigoOC={}", BASE, code)
}

pub fn pdf_url(code: &str) -> String {
    format!("{}/PurchaseOrder/Modules/PO/PDFReport.aspx?qs={}", BASE, code)
}

pub fn attachments_page_url(code: &str) -> String {
    format!(
        "{}/Portal/Modules/Site/AdvancedSearch/ViewAttachmentPurchaseOrder.aspx?qs={}",
        BASE, code
    )
}

pub fn attachment_url(code: &str, index: usize) -> String {
    format!("{}/files/{}/{}.pdf", BASE, code, index)
}

pub fn detail_html(code: &str, with_attachments: bool) -> String {
    let attachments = if with_attachments {
        format!(
            r##"<a href="#" onclick="window.open('ViewAttachmentPurchaseOrder.aspx?qs={}','_blank')">Anexos</a>"##,
            code
        )
    } else {
        String::new()
    };
    format!(
        r#"<html><body>
             <input type="image" onclick="javascript:window.open('PDFReport.aspx?qs={}','_blank');return false;" />
             {}
           </body></html>"#,
        code, attachments
    )
}

pub fn attachments_html(code: &str, count: usize) -> String {
    let rows: String = (1..=count)
        .map(|i| {
            format!(
                r#"<tr><td>anexo_{i}.pdf</td><td>Cotización</td><td>0{i}-06-2025</td><td><a href="{url}">ver</a></td></tr>"#,
                i = i,
                url = attachment_url(code, i)
            )
        })
        .collect();
    format!(
        "<table><tr><td>Nombre del Anexo</td><td>Tipo</td><td>Fecha</td><td>Ver</td></tr>{}</table>",
        rows
    )
}

pub fn html(body: String) -> PortalResponse {
    PortalResponse {
        status: 200,
        content_type: Some("text/html; charset=utf-8".into()),
        retry_after: None,
        body: Bytes::from(body),
    }
}

pub fn pdf(label: &str) -> PortalResponse {
    PortalResponse {
        status: 200,
        content_type: Some("application/pdf".into()),
        retry_after: None,
        body: Bytes::from(format!("%PDF-1.7\n{}\n%%EOF", label)),
    }
}

pub fn status(code: u16) -> PortalResponse {
    PortalResponse {
        status: code,
        content_type: Some("text/html".into()),
        retry_after: None,
        body: Bytes::from_static(b"<html>error</html>"),
    }
}

// ========== Portal ==========

/// Scripted portal. A route answers with its queued responses in order and
/// keeps repeating the last one; unknown URLs answer 404.
#[derive(Default)]
pub struct FakePortal {
    routes: Mutex<HashMap<String, VecDeque<PortalResponse>>>,
    calls: Mutex<HashMap<String, usize>>,
    starts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn route(&self, url: impl Into<String>, responses: Vec<PortalResponse>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.into(), responses.into_iter().collect());
    }

    /// A complete, well-formed purchase order with `attachments` attachments.
    pub fn publish(&self, code: &str, attachments: usize) {
        self.route(detail_url(code), vec![html(detail_html(code, attachments > 0))]);
        self.route(pdf_url(code), vec![pdf(&format!("{} main", code))]);
        if attachments > 0 {
            self.route(attachments_page_url(code), vec![html(attachments_html(code, attachments))]);
            for i in 1..=attachments {
                self.route(attachment_url(code, i), vec![pdf(&format!("{} att {}", code, i))]);
            }
        }
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<Instant> {
        let mut starts = self.starts.lock().unwrap().clone();
        starts.sort();
        starts
    }

    fn next_response(&self, url: &str) -> PortalResponse {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => status(404),
        }
    }
}

#[async_trait]
impl PortalTransport for FakePortal {
    async fn get(&self, url: &str, _max_bytes: u64) -> Result<PortalResponse, FetchError> {
        self.starts.lock().unwrap().push(Instant::now());
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self.next_response(url))
    }
}

// ========== Object store ==========

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    fail_keys: Mutex<HashSet<String>>,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn fail_on(&self, key: impl Into<String>) {
        self.fail_keys.lock().unwrap().insert(key.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn keys_for(&self, code: &str) -> Vec<String> {
        let prefix = format!("raw/{}/", code);
        self.keys().into_iter().filter(|k| k.starts_with(&prefix)).collect()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    pub fn metadata(&self, code: &str) -> Option<serde_json::Value> {
        self.get(&format!("raw/{}/metadata.json", code))
            .map(|b| serde_json::from_slice(&b).unwrap())
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(StorageError::upload(key, "access denied"));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ========== Status table ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub status: ScrapeStatus,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct MemoryStateStore {
    rows: Mutex<BTreeMap<String, Row>>,
    attachments: Mutex<HashMap<String, Vec<AttachmentRecord>>>,
    writes: AtomicUsize,
    dry_run: bool,
    fail_claims: bool,
}

impl MemoryStateStore {
    pub fn seeded(codes: &[&str]) -> Self {
        let store = Self::default();
        store.seed(codes);
        store
    }

    pub fn dry_run(codes: &[&str]) -> Self {
        let store = Self {
            dry_run: true,
            ..Self::default()
        };
        store.seed(codes);
        store
    }

    pub fn unavailable() -> Self {
        Self {
            fail_claims: true,
            ..Self::default()
        }
    }

    fn seed(&self, codes: &[&str]) {
        let mut rows = self.rows.lock().unwrap();
        for code in codes {
            rows.insert(
                code.to_string(),
                Row {
                    status: ScrapeStatus::Pending,
                    error: None,
                },
            );
        }
    }

    pub fn row(&self, code: &str) -> Option<Row> {
        self.rows.lock().unwrap().get(code).cloned()
    }

    pub fn status(&self, code: &str) -> Option<ScrapeStatus> {
        self.row(code).map(|r| r.status)
    }

    pub fn attachment_rows(&self, code: &str) -> Vec<AttachmentRecord> {
        self.attachments.lock().unwrap().get(code).cloned().unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn mark(&self, codes: &[String], status: ScrapeStatus) {
        if self.dry_run {
            return;
        }
        let mut rows = self.rows.lock().unwrap();
        for code in codes {
            if let Some(row) = rows.get_mut(code) {
                row.status = status;
                self.writes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl ScrapeStateStore for MemoryStateStore {
    async fn claim_pending(&self, limit: usize) -> Result<Vec<String>, StateStoreError> {
        if self.fail_claims {
            return Err(StateStoreError::Unavailable {
                status: 503,
                retry_after: None,
            });
        }
        let codes: Vec<String> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, row)| row.status == ScrapeStatus::Pending)
            .map(|(code, _)| code.clone())
            .take(limit)
            .collect();
        self.mark(&codes, ScrapeStatus::InProgress);
        Ok(codes)
    }

    async fn claim_codes(&self, codes: &[String]) -> Result<Vec<String>, StateStoreError> {
        if self.fail_claims {
            return Err(StateStoreError::Request("connection refused".into()));
        }
        let known: Vec<String> = {
            let rows = self.rows.lock().unwrap();
            codes.iter().filter(|c| rows.contains_key(*c)).cloned().collect()
        };
        self.mark(&known, ScrapeStatus::InProgress);
        Ok(known)
    }

    async fn record_outcome(
        &self,
        code: &str,
        status: ScrapeStatus,
        error: Option<&str>,
    ) -> Result<(), StateStoreError> {
        if self.dry_run {
            return Ok(());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(
            code.to_string(),
            Row {
                status,
                error: error.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn record_attachments(
        &self,
        code: &str,
        attachments: &[AttachmentRecord],
    ) -> Result<(), StateStoreError> {
        if self.dry_run {
            return Ok(());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .lock()
            .unwrap()
            .insert(code.to_string(), attachments.to_vec());
        Ok(())
    }
}

// ========== Wiring ==========

pub struct Harness {
    pub portal: Arc<FakePortal>,
    pub store: Arc<MemoryObjectStore>,
    pub state: Arc<MemoryStateStore>,
    pub limiter: Arc<RateLimiter>,
    pub runner: BatchRunner,
}

pub struct Settings {
    pub max_concurrent: usize,
    pub delay: (Duration, Duration),
    pub dry_run: bool,
    pub codes: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            delay: (Duration::ZERO, Duration::ZERO),
            dry_run: false,
            codes: None,
        }
    }
}

/// Millisecond backoff so retry tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
}

pub fn fetcher(portal: Arc<FakePortal>, limiter: Arc<RateLimiter>) -> DocumentFetcher {
    let pages = PortalPages::new(BASE).unwrap();
    DocumentFetcher::new(portal, limiter, pages, 1024 * 1024).with_retry(fast_retry())
}

pub fn harness(portal: FakePortal, state: MemoryStateStore, settings: Settings) -> Harness {
    let portal = Arc::new(portal);
    let store = Arc::new(MemoryObjectStore::default());
    let state = Arc::new(state);
    let limiter = Arc::new(RateLimiter::new(
        settings.max_concurrent,
        settings.delay.0,
        settings.delay.1,
    ));

    let config = Config {
        max_concurrent: settings.max_concurrent,
        dry_run: settings.dry_run,
        codes: settings.codes,
        ..Config::default()
    };

    let writer = StorageWriter::new(store.clone(), settings.dry_run);
    let flow = Arc::new(DocumentFlow::new(
        fetcher(portal.clone(), limiter.clone()),
        writer,
        state.clone(),
    ));
    let runner = BatchRunner::new(flow, state.clone(), &config);

    Harness {
        portal,
        store,
        state,
        limiter,
        runner,
    }
}
