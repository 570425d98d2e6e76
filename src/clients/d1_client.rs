/// Cloudflare D1 client
///
/// Implements [`ScrapeStateStore`] over the D1 REST query endpoint. Every
/// statement goes through the shared retry policy; 408/429/5xx and network
/// failures are retried, everything else is surfaced.
use crate::clients::state_store::ScrapeStateStore;
use crate::clients::portal_client::parse_retry_after;
use crate::config::Config;
use crate::error::StateStoreError;
use crate::infrastructure::RetryPolicy;
use crate::models::{AttachmentRecord, ScrapeStatus};
use crate::utils::logging::truncate_text;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// SQLite caps bound variables; multi-code statements are chunked.
const MAX_CODES_PER_STATEMENT: usize = 50;

/// D1 binds at most 100 parameters per statement, 7 per attachment row.
const MAX_ATTACHMENT_ROWS_PER_STATEMENT: usize = 14;

const MAX_ERROR_CHARS: usize = 500;

/// Reclaimable rows. Binds: stale cutoff, attempt cap.
const CANDIDATE_PREDICATE: &str = "(status = 'pending' \
     OR (status IN ('failed', 'in_progress') \
         AND (last_attempt_at IS NULL OR last_attempt_at < ?))) \
     AND COALESCE(attempts, 0) < ?";

#[derive(Debug, Deserialize)]
struct D1Envelope {
    success: bool,
    #[serde(default)]
    errors: Vec<Value>,
    #[serde(default)]
    result: Vec<D1QueryResult>,
}

#[derive(Debug, Deserialize)]
struct D1QueryResult {
    #[serde(default)]
    results: Vec<Value>,
}

pub struct D1Client {
    http: Client,
    query_url: String,
    api_token: String,
    retry: RetryPolicy,
    dry_run: bool,
    stale_after: Duration,
    max_scrape_attempts: u32,
}

impl D1Client {
    pub fn new(config: &Config) -> Result<Self, StateStoreError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            query_url: query_url(
                &config.d1_api_base_url,
                &config.cf_account_id,
                &config.d1_database_id,
            ),
            api_token: config.cf_api_token.clone(),
            retry: RetryPolicy::d1(),
            dry_run: config.dry_run,
            stale_after: config.stale_after(),
            max_scrape_attempts: config.max_scrape_attempts,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connectivity check run before a batch starts
    pub async fn ping(&self) -> Result<(), StateStoreError> {
        self.execute("SELECT 1 AS ok", Vec::new()).await?;
        Ok(())
    }

    /// Runs one statement and returns its rows.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, StateStoreError> {
        self.retry
            .run("D1 query", move |_| {
                let params = params.clone();
                async move { self.execute_once(sql, params).await }
            })
            .await
    }

    async fn execute_once(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, StateStoreError> {
        let mut payload = json!({ "sql": sql });
        if !params.is_empty() {
            payload["params"] = Value::Array(params);
        }

        let response = self
            .http
            .post(&self.query_url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        if RETRYABLE_STATUS_CODES.contains(&status) {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(StateStoreError::Unavailable { status, retry_after });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| StateStoreError::Decode(e.to_string()))?;

        if status >= 400 {
            return Err(StateStoreError::Api {
                status,
                message: truncate_text(&body, 200),
            });
        }
        if !content_type.contains("application/json") {
            return Err(StateStoreError::Decode(format!(
                "unexpected content type '{}' (HTTP {}): {}",
                content_type,
                status,
                truncate_text(&body, 200)
            )));
        }

        decode_rows(&body, status)
    }

    async fn run(&self, statement: Statement) -> Result<Vec<Value>, StateStoreError> {
        self.execute(&statement.sql, statement.params).await
    }

    fn stale_cutoff(&self) -> String {
        let stale = chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::hours(1));
        timestamp(Utc::now() - stale)
    }

    fn candidate_guard(&self) -> CandidateGuard {
        CandidateGuard {
            stale_cutoff: self.stale_cutoff(),
            max_attempts: self.max_scrape_attempts,
        }
    }

    async fn select_existing(&self, codes: &[String]) -> Result<HashSet<String>, StateStoreError> {
        let mut existing = HashSet::new();
        for chunk in codes.chunks(MAX_CODES_PER_STATEMENT) {
            let rows = self.run(existing_query(chunk)).await?;
            existing.extend(codes_from_rows(&rows));
        }
        Ok(existing)
    }

    /// Flips `codes` to in_progress. With a guard, only rows still matching
    /// the candidate predicate are touched (compare-and-swap).
    async fn mark_in_progress(
        &self,
        codes: &[String],
        guard: Option<&CandidateGuard>,
    ) -> Result<HashSet<String>, StateStoreError> {
        let now = timestamp(Utc::now());
        let mut claimed = HashSet::new();
        for chunk in codes.chunks(MAX_CODES_PER_STATEMENT) {
            let rows = self.run(claim_update(chunk, &now, guard)).await?;
            claimed.extend(codes_from_rows(&rows));
        }
        Ok(claimed)
    }
}

#[async_trait]
impl ScrapeStateStore for D1Client {
    async fn claim_pending(&self, limit: usize) -> Result<Vec<String>, StateStoreError> {
        let guard = self.candidate_guard();
        let candidates = codes_from_rows(&self.run(candidates_query(&guard, limit)).await?);
        if self.dry_run || candidates.is_empty() {
            return Ok(candidates);
        }

        let claimed = self.mark_in_progress(&candidates, Some(&guard)).await?;
        if claimed.len() < candidates.len() {
            warn!(
                "{} candidate(s) changed status before they could be claimed",
                candidates.len() - claimed.len()
            );
        }
        Ok(candidates
            .into_iter()
            .filter(|code| claimed.contains(code))
            .collect())
    }

    async fn claim_codes(&self, codes: &[String]) -> Result<Vec<String>, StateStoreError> {
        let unique = unique_codes(codes);
        let existing = self.select_existing(&unique).await?;
        let (known, unknown): (Vec<String>, Vec<String>) =
            unique.into_iter().partition(|c| existing.contains(c));
        for code in &unknown {
            warn!("[code {}] not present in document_scrapes, skipping", code);
        }

        if !self.dry_run && !known.is_empty() {
            self.mark_in_progress(&known, None).await?;
        }
        Ok(known)
    }

    async fn record_outcome(
        &self,
        code: &str,
        status: ScrapeStatus,
        error: Option<&str>,
    ) -> Result<(), StateStoreError> {
        let statement = outcome_update(code, status, error, &timestamp(Utc::now()));
        if self.dry_run {
            info!(
                "[code {}] dry run: would record status={} error={}",
                code, status, statement.params[1]
            );
            return Ok(());
        }

        self.run(statement).await?;
        debug!("[code {}] recorded {}", code, status);
        Ok(())
    }

    async fn record_attachments(
        &self,
        code: &str,
        attachments: &[AttachmentRecord],
    ) -> Result<(), StateStoreError> {
        if self.dry_run {
            info!("[code {}] dry run: would record {} attachment row(s)", code, attachments.len());
            return Ok(());
        }

        self.run(Statement::new(
            "DELETE FROM attachments WHERE document_code = ?",
            vec![json!(code)],
        ))
        .await?;
        for chunk in attachments.chunks(MAX_ATTACHMENT_ROWS_PER_STATEMENT) {
            self.run(attachments_insert(chunk)).await?;
        }
        Ok(())
    }
}

// ========== Statements ==========

/// One SQL statement with its bound parameters
#[derive(Debug, Clone, PartialEq)]
struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Bindings of [`CANDIDATE_PREDICATE`]
#[derive(Debug, Clone)]
struct CandidateGuard {
    stale_cutoff: String,
    max_attempts: u32,
}

impl CandidateGuard {
    fn params(&self) -> [Value; 2] {
        [json!(self.stale_cutoff), json!(self.max_attempts)]
    }
}

/// Never attempted first, then oldest attempt first.
fn candidates_query(guard: &CandidateGuard, limit: usize) -> Statement {
    let mut params = guard.params().to_vec();
    params.push(json!(limit));
    Statement::new(
        format!(
            "SELECT code FROM document_scrapes WHERE {} \
             ORDER BY last_attempt_at IS NOT NULL, last_attempt_at ASC, code ASC LIMIT ?",
            CANDIDATE_PREDICATE
        ),
        params,
    )
}

fn existing_query(chunk: &[String]) -> Statement {
    Statement::new(
        format!(
            "SELECT code FROM document_scrapes WHERE code IN ({})",
            placeholders(chunk.len())
        ),
        chunk.iter().map(|c| json!(c)).collect(),
    )
}

fn claim_update(chunk: &[String], now: &str, guard: Option<&CandidateGuard>) -> Statement {
    let mut sql = format!(
        "UPDATE document_scrapes SET status = 'in_progress', last_attempt_at = ? \
         WHERE code IN ({})",
        placeholders(chunk.len())
    );
    let mut params = vec![json!(now)];
    params.extend(chunk.iter().map(|c| json!(c)));
    if let Some(guard) = guard {
        sql.push_str(&format!(" AND {}", CANDIDATE_PREDICATE));
        params.extend(guard.params());
    }
    sql.push_str(" RETURNING code");
    Statement::new(sql, params)
}

/// Keyed outcome write. `attempts` only moves when `last_attempt_at` is not
/// already `now`, so replaying the same request after a lost response does
/// not count the attempt twice.
fn outcome_update(code: &str, status: ScrapeStatus, error: Option<&str>, now: &str) -> Statement {
    let counted = u32::from(matches!(status, ScrapeStatus::Failed | ScrapeStatus::Partial));
    Statement::new(
        "UPDATE document_scrapes \
         SET status = ?, error = ?, \
             attempts = COALESCE(attempts, 0) + CASE WHEN last_attempt_at = ? THEN 0 ELSE ? END, \
             last_attempt_at = ? \
         WHERE code = ?",
        vec![
            json!(status.as_str()),
            json!(error.map(truncate_error)),
            json!(now),
            json!(counted),
            json!(now),
            json!(code),
        ],
    )
}

/// Multi-row insert that skips rows already present, so a replay after a
/// lost response inserts nothing twice.
fn attachments_insert(rows: &[AttachmentRecord]) -> Statement {
    let values = vec!["(?, ?, ?, ?, ?, ?, ?)"; rows.len()].join(", ");
    let params = rows
        .iter()
        .flat_map(|record| {
            [
                json!(record.document_code),
                json!(record.sequence_index),
                json!(record.storage_key),
                json!(record.file_size),
                json!(record.content_hash),
                json!(record.filename),
                json!(record.file_type),
            ]
        })
        .collect();
    Statement::new(
        format!(
            "INSERT INTO attachments \
             (document_code, sequence_index, storage_key, file_size, content_hash, filename, file_type) \
             SELECT v.column1, v.column2, v.column3, v.column4, v.column5, v.column6, v.column7 \
             FROM (VALUES {}) AS v \
             WHERE NOT EXISTS (SELECT 1 FROM attachments a \
                 WHERE a.document_code = v.column1 AND a.sequence_index = v.column2)",
            values
        ),
        params,
    )
}

/// First occurrence wins, order kept.
fn unique_codes(codes: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    codes
        .iter()
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect()
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_CHARS).collect()
}

// ========== Helpers ==========

fn query_url(api_base_url: &str, account_id: &str, database_id: &str) -> String {
    format!(
        "{}/accounts/{}/d1/database/{}/query",
        api_base_url.trim_end_matches('/'),
        account_id,
        database_id
    )
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Fixed-width UTC timestamps so string comparison orders them.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_rows(body: &str, status: u16) -> Result<Vec<Value>, StateStoreError> {
    let envelope: D1Envelope = serde_json::from_str(body)?;
    if !envelope.success {
        return Err(StateStoreError::Api {
            status,
            message: format!("query failed: {}", Value::Array(envelope.errors)),
        });
    }
    Ok(envelope
        .result
        .into_iter()
        .next()
        .map(|r| r.results)
        .unwrap_or_default())
}

fn codes_from_rows(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("code").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
