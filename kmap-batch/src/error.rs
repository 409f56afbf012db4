use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Engine construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid batch config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a transport for one whole batch request.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: String,
    pub message: String,
    /// HTTP-like status, when the store reports one
    pub status: Option<u16>,
    pub retryable: bool,
    /// Delay suggested by the store before retrying
    pub retry_after: Option<Duration>,
}

impl TransportError {
    /// Non-retryable error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            retryable: false,
            retry_after: None,
        }
    }

    /// Throughput exceeded; always retryable.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new("ProvisionedThroughputExceededException", message)
            .with_status(400)
            .retryable()
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Retryable when flagged so, or when the status is 429 / 5xx.
    pub fn is_retryable(&self) -> bool {
        self.retryable || matches!(self.status, Some(429) | Some(500..=599))
    }
}

/// Error codes recorded by the engine itself
pub mod codes {
    pub const RETRY_LIMIT_EXCEEDED: &str = "RETRY_LIMIT_EXCEEDED";
    pub const CANCELLED: &str = "CANCELLED";
}

/// Error recorded in a batch run's output. Runs never fail as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub code: String,
    /// Whitespace-normalized, truncated message
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    /// Ledger sequence of the failing request, if any
    pub batch: Option<u64>,
}

impl BatchError {
    pub fn from_transport(error: &TransportError, batch: u64, max_len: usize) -> Self {
        Self {
            code: error.code.clone(),
            message: normalize_message(&error.message, max_len),
            status: error.status,
            retryable: error.is_retryable(),
            retry_after: error.retry_after,
            batch: Some(batch),
        }
    }

    pub fn engine(code: &str, message: impl AsRef<str>, max_len: usize) -> Self {
        Self {
            code: code.to_string(),
            message: normalize_message(message.as_ref(), max_len),
            status: None,
            retryable: false,
            retry_after: None,
            batch: None,
        }
    }
}

/// Collapses whitespace runs and cuts the message to `max_len` characters.
pub fn normalize_message(message: &str, max_len: usize) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_len)
        .collect()
}
