/// Portal HTTP client
///
/// Wraps every GET against mercadopublico.cl: browser-like headers, a fixed
/// request timeout and a body ceiling enforced while streaming.
use crate::error::FetchError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw answer of one GET
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: Bytes,
}

impl PortalResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Narrow HTTP seam used by the document fetcher
#[async_trait]
pub trait PortalTransport: Send + Sync {
    /// GET `url`, reading at most `max_bytes` of body.
    ///
    /// Network failures and timeouts are [`FetchError::TransientFetch`]; an
    /// oversized body is [`FetchError::InvalidContent`]. HTTP statuses are
    /// returned as-is for the caller to interpret.
    async fn get(&self, url: &str, max_bytes: u64) -> Result<PortalResponse, FetchError>;
}

/// reqwest-backed transport
pub struct PortalClient {
    http: Client,
}

impl PortalClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/pdf,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-CL,es;q=0.9,en;q=0.8"),
        );

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .gzip(true)
            .redirect(Policy::limited(8))
            .timeout(timeout)
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl PortalTransport for PortalClient {
    async fn get(&self, url: &str, max_bytes: u64) -> Result<PortalResponse, FetchError> {
        debug!("GET {}", url);
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(too_large(url, max_bytes));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(url, &e))?
        {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(too_large(url, max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(PortalResponse {
            status,
            content_type,
            retry_after,
            body: body.freeze(),
        })
    }
}

/// `Retry-After` in delta-seconds form.
///
/// The HTTP-date form yields `None`, so the portal fetcher and the D1 client
/// fall back to their computed backoff for it.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn transport_error(url: &str, err: &reqwest::Error) -> FetchError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    FetchError::transient(url, message)
}

fn too_large(url: &str, max_bytes: u64) -> FetchError {
    FetchError::invalid_content(url, format!("body exceeds {} bytes", max_bytes))
}
