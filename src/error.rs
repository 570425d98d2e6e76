use crate::infrastructure::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching a document from the portal.
///
/// Only [`FetchError::TransientFetch`] is retried; every other variant is
/// surfaced on the first occurrence.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network failure, timeout, 408/429 or 5xx
    #[error("transient fetch failure ({url}): {message}")]
    TransientFetch {
        url: String,
        message: String,
        retry_after: Option<Duration>,
    },
    /// The portal has no such document. `status` is 200 when the portal
    /// answered with a blank or "no existe" detail page.
    #[error("document not found ({url}): HTTP {status}")]
    NotFound { url: String, status: u16 },
    /// The page loaded but its structure is not the one we know
    #[error("portal layout mismatch ({url}): {message}")]
    Parse { url: String, message: String },
    /// The downloaded blob is not an acceptable PDF
    #[error("invalid content ({url}): {message}")]
    InvalidContent { url: String, message: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::TransientFetch { .. })
    }

    /// Server-requested wait, if the response carried one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::TransientFetch { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short label used in logs and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::TransientFetch { .. } => "transient",
            FetchError::NotFound { .. } => "not_found",
            FetchError::Parse { .. } => "parse",
            FetchError::InvalidContent { .. } => "invalid_content",
        }
    }

    pub fn transient(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::TransientFetch {
            url: url.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn invalid_content(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::InvalidContent {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        FetchError::retry_after(self)
    }
}

/// Object storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A single object write failed
    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },
    /// Listing the objects under a prefix failed
    #[error("listing {prefix} failed: {message}")]
    List { prefix: String, message: String },
    /// Removing an object failed
    #[error("delete of {key} failed: {message}")]
    Delete { key: String, message: String },
}

impl StorageError {
    pub fn upload(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StorageError::Upload {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn list(prefix: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StorageError::List {
            prefix: prefix.into(),
            message: message.to_string(),
        }
    }

    pub fn delete(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StorageError::Delete {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Status table errors
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The request never produced a usable response
    #[error("state store request failed: {0}")]
    Request(String),
    /// 408, 429 or 5xx from the API
    #[error("state store unavailable (HTTP {status})")]
    Unavailable {
        status: u16,
        retry_after: Option<Duration>,
    },
    /// The API answered with an error
    #[error("state store API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },
    /// The response body could not be understood
    #[error("state store response could not be decoded: {0}")]
    Decode(String),
}

impl Retryable for StateStoreError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            StateStoreError::Request(_) | StateStoreError::Unavailable { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            StateStoreError::Unavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StateStoreError {
    fn from(err: reqwest::Error) -> Self {
        StateStoreError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for StateStoreError {
    fn from(err: serde_json::Error) -> Self {
        StateStoreError::Decode(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing
    #[error("environment variable {var_name} is not set")]
    MissingVar { var_name: String },
    /// A variable is set but cannot be used
    #[error("environment variable {var_name} has invalid value '{value}': expected {expected}")]
    InvalidVar {
        var_name: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    pub fn invalid(
        var_name: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidVar {
            var_name: var_name.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}
