use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Batch engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of requests in flight at once
    pub concurrency: usize,

    /// Items per request (None = the operation's maximum)
    pub batch_size: Option<usize>,

    /// Backoff between retries
    pub retry: RetryPolicy,

    /// Recorded error messages are cut to this many characters
    pub max_error_message_len: usize,
}

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_ERROR_MESSAGE_LEN: usize = 256;

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: None,
            retry: RetryPolicy::default(),
            max_error_message_len: DEFAULT_MAX_ERROR_MESSAGE_LEN,
        }
    }
}

impl BatchConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_error_message_len(mut self, len: usize) -> Self {
        self.max_error_message_len = len;
        self
    }

    /// Items per request for an operation capped at `max`.
    pub fn effective_batch_size(&self, max: usize) -> usize {
        self.batch_size.map(|size| size.min(max)).unwrap_or(max)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }

        if let Some(size) = self.batch_size {
            if size == 0 {
                return Err("batch_size must be greater than 0 when set".to_string());
            }
        }

        if self.max_error_message_len == 0 {
            return Err("max_error_message_len must be greater than 0".to_string());
        }

        // a delay that never grows past the ceiling would retry forever
        if self.retry.max_backoff_ms > 0 {
            if self.retry.initial_backoff_ms == 0 {
                return Err("initial_backoff_ms must be greater than 0 when retrying".to_string());
            }
            let multiplier = self.retry.backoff_multiplier;
            if multiplier.is_nan() || multiplier <= 1.0 {
                return Err("backoff_multiplier must be greater than 1.0 when retrying".to_string());
            }
        }

        Ok(())
    }
}
