//! Local stand-in for the D1 `/query` endpoint, backed by in-memory SQLite.

use chrono::{DateTime, SecondsFormat, Utc};
use mercadopublico_scraper::clients::D1Client;
use mercadopublico_scraper::config::Config;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::fast_retry;

const SCHEMA: [&str; 2] = [
    "CREATE TABLE document_scrapes (
        code TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'pending',
        error TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TEXT
    )",
    "CREATE TABLE attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_code TEXT NOT NULL,
        sequence_index INTEGER NOT NULL,
        storage_key TEXT NOT NULL,
        file_size INTEGER,
        content_hash TEXT,
        filename TEXT,
        file_type TEXT
    )",
];

const CLAIM_PREFIX: &str = "UPDATE document_scrapes SET status = 'in_progress'";

/// Row of `document_scrapes` as the tests read it
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeRow {
    pub status: String,
    pub error: Option<String>,
    pub attempts: i64,
    pub last_attempt_at: Option<String>,
}

pub struct FakeD1 {
    addr: SocketAddr,
    inner: Arc<Inner>,
}

struct Inner {
    db: tokio::sync::Mutex<SqliteConnection>,
    statements: Mutex<Vec<String>>,
    before_claim: Mutex<Option<String>>,
    fail_after_commit: Mutex<Option<String>>,
}

impl FakeD1 {
    pub async fn start() -> Self {
        let mut db = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&mut db).await.unwrap();
        }

        let inner = Arc::new(Inner {
            db: tokio::sync::Mutex::new(db),
            statements: Mutex::new(Vec::new()),
            before_claim: Mutex::new(None),
            fail_after_commit: Mutex::new(None),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = inner.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, server.clone()));
            }
        });

        Self { addr, inner }
    }

    pub fn config(&self, dry_run: bool) -> Config {
        Config {
            cf_account_id: "acct".into(),
            cf_api_token: "token".into(),
            d1_database_id: "db".into(),
            d1_api_base_url: format!("http://{}", self.addr),
            dry_run,
            ..Config::default()
        }
    }

    pub fn client(&self, dry_run: bool) -> D1Client {
        D1Client::new(&self.config(dry_run))
            .unwrap()
            .with_retry(fast_retry())
    }

    pub async fn seed(&self, code: &str, status: &str, attempts: i64, last_attempt_at: Option<String>) {
        let mut db = self.inner.db.lock().await;
        sqlx::query(
            "INSERT INTO document_scrapes (code, status, attempts, last_attempt_at) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(status)
        .bind(attempts)
        .bind(last_attempt_at)
        .execute(&mut *db)
        .await
        .unwrap();
    }

    /// Runs `sql` directly against the database, outside the endpoint.
    pub async fn exec(&self, sql: &str) {
        let mut db = self.inner.db.lock().await;
        sqlx::query(sql).execute(&mut *db).await.unwrap();
    }

    pub async fn row(&self, code: &str) -> Option<ScrapeRow> {
        let mut db = self.inner.db.lock().await;
        sqlx::query_as::<_, (String, Option<String>, i64, Option<String>)>(
            "SELECT status, error, attempts, last_attempt_at FROM document_scrapes WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *db)
        .await
        .unwrap()
        .map(|(status, error, attempts, last_attempt_at)| ScrapeRow {
            status,
            error,
            attempts,
            last_attempt_at,
        })
    }

    pub async fn status(&self, code: &str) -> Option<String> {
        self.row(code).await.map(|row| row.status)
    }

    /// `(sequence_index, storage_key)` of a code, in index order
    pub async fn attachment_rows(&self, code: &str) -> Vec<(i64, String)> {
        let mut db = self.inner.db.lock().await;
        sqlx::query_as::<_, (i64, String)>(
            "SELECT sequence_index, storage_key FROM attachments \
             WHERE document_code = ? ORDER BY sequence_index",
        )
        .bind(code)
        .fetch_all(&mut *db)
        .await
        .unwrap()
    }

    /// SQL of every statement received, in arrival order, replays included
    pub fn statements(&self) -> Vec<String> {
        self.inner.statements.lock().unwrap().clone()
    }

    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }

    /// Runs `sql` right before the first claim update reaches the database.
    pub fn before_claim(&self, sql: impl Into<String>) {
        *self.inner.before_claim.lock().unwrap() = Some(sql.into());
    }

    /// The next statement starting with `prefix` is committed, then answered
    /// with a 503 as if the response got lost.
    pub fn fail_after_commit(&self, prefix: impl Into<String>) {
        *self.inner.fail_after_commit.lock().unwrap() = Some(prefix.into());
    }
}

pub fn ago(duration: chrono::Duration) -> Option<String> {
    Some(stamp(Utc::now() - duration))
}

pub fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ========== Endpoint ==========

impl Inner {
    async fn handle(&self, request: Value) -> (u16, Value) {
        let sql = request["sql"].as_str().unwrap_or_default().to_string();
        let params = request["params"].as_array().cloned().unwrap_or_default();
        self.statements.lock().unwrap().push(sql.clone());

        if sql.starts_with(CLAIM_PREFIX) {
            let hook = self.before_claim.lock().unwrap().take();
            if let Some(hook) = hook {
                if let Err(e) = self.query(&hook, &[]).await {
                    return (500, failure(&e.to_string()));
                }
            }
        }

        let rows = match self.query(&sql, &params).await {
            Ok(rows) => rows,
            Err(e) => return (400, failure(&e.to_string())),
        };

        let lose_response = {
            let mut armed = self.fail_after_commit.lock().unwrap();
            if armed.as_deref().is_some_and(|prefix| sql.starts_with(prefix)) {
                armed.take();
                true
            } else {
                false
            }
        };
        if lose_response {
            return (503, failure("response lost"));
        }

        (
            200,
            json!({
                "success": true,
                "errors": [],
                "result": [{ "results": rows, "success": true, "meta": {} }],
            }),
        )
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, sqlx::Error> {
        let mut query = sqlx::query::<sqlx::Sqlite>(sql);
        for param in params {
            query = bind(query, param);
        }
        let mut db = self.db.lock().await;
        let rows = query.fetch_all(&mut *db).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

fn bind<'q>(query: SqliteQuery<'q>, param: &Value) -> SqliteQuery<'q> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = serde_json::Map::new();
    for column in row.columns() {
        let i = column.ordinal();
        let is_null = row.try_get_raw(i).map(|raw| raw.is_null()).unwrap_or(true);
        let type_name = row
            .try_get_raw(i)
            .map(|raw| raw.type_info().name().to_string())
            .unwrap_or_default();
        let value = if is_null {
            Value::Null
        } else {
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
                "REAL" => row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null),
                _ => row.try_get::<String, _>(i).map(Value::from).unwrap_or(Value::Null),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

fn failure(message: &str) -> Value {
    json!({ "success": false, "errors": [{ "code": 7500, "message": message }], "result": [] })
}

async fn serve(mut socket: TcpStream, inner: Arc<Inner>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let request = serde_json::from_slice(&buf[header_end..header_end + length]).unwrap_or(Value::Null);
    let (status, body) = inner.handle(request).await;
    let body = body.to_string();
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
