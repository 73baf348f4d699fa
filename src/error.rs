use serde::Serialize;
use thiserror::Error;
use crate::types::ids::{InstrumentId, SourceId};

#[derive(Error, Debug)]
pub enum Error {
    // Lookup Errors
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("Duplicate source id: {0}")]
    DuplicateSource(SourceId),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Task failure: {0}")]
    TaskFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single adapter fetch. Absorbed by the round that issued it.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("HTTP error (status {status:?}): {message}")]
    Http { status: Option<u16>, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Instrument {0} not supported by this source")]
    Unsupported(InstrumentId),
}

impl FetchError {
    /// Transport failures, timeouts, rate limiting and server errors may
    /// succeed on a later attempt; malformed payloads and client errors won't.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Http { status: None, .. } => true,
            FetchError::Http { status: Some(code), .. } => *code == 429 || *code >= 500,
            FetchError::Parse(_) | FetchError::Unsupported(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { .. } => "http_error",
            FetchError::Parse(_) => "parse_error",
            FetchError::Unsupported(_) => "unsupported",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { after_ms: 0 }
        } else if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else {
            FetchError::Http {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(FetchError::Timeout { after_ms: 10 }.is_retryable());
        assert!(FetchError::Http { status: None, message: "reset".into() }.is_retryable());
        assert!(FetchError::Http { status: Some(503), message: "down".into() }.is_retryable());
        assert!(FetchError::Http { status: Some(429), message: "slow".into() }.is_retryable());
        assert!(!FetchError::Http { status: Some(404), message: "gone".into() }.is_retryable());
        assert!(!FetchError::Parse("bad json".into()).is_retryable());
    }
}
