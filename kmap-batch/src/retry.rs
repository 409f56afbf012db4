use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff used between batch retries.
///
/// The delay starts at `initial_backoff_ms` and is multiplied on every
/// consecutive backoff. Once it would exceed `max_backoff_ms` the run gives
/// up; a zero ceiling disables retrying altogether.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Ceiling; a computed delay above it exhausts the retries
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Returns a policy optimized for quick transient failures.
    pub fn fast() -> Self {
        Self {
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    /// Returns a policy for longer-running retry scenarios.
    pub fn standard() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before the given consecutive backoff (0-indexed), or `None`
    /// once the ceiling is passed.
    pub fn backoff_duration(&self, attempt: u32) -> Option<Duration> {
        if self.max_backoff_ms == 0 {
            return None;
        }
        let backoff_ms =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        if backoff_ms > self.max_backoff_ms as f64 {
            return None;
        }
        Some(Duration::from_millis(backoff_ms as u64))
    }

    /// Like `backoff_duration`, honouring a larger delay suggested by the
    /// store (capped at the ceiling).
    pub fn backoff_with_hint(&self, attempt: u32, suggested: Option<Duration>) -> Option<Duration> {
        let computed = self.backoff_duration(attempt)?;
        let ceiling = Duration::from_millis(self.max_backoff_ms);
        Some(match suggested {
            Some(hint) if hint > computed => hint.min(ceiling),
            _ => computed,
        })
    }

    /// Number of backoffs allowed before the ceiling is reached.
    pub fn max_retries(&self) -> u32 {
        let mut attempt = 0;
        while attempt < 64 && self.backoff_duration(attempt).is_some() {
            attempt += 1;
        }
        attempt
    }
}

impl Default for RetryPolicy {
    /// Returns a sensible default retry policy (same as `standard()`).
    fn default() -> Self {
        Self::standard()
    }
}
