use async_trait::async_trait;

use crate::error::TransportError;
use crate::operation::BatchOperation;

/// Outcome of one successful batch call
pub struct BatchResponse<Op: BatchOperation> {
    pub processed: Vec<Op::Output>,
    /// Requests the store did not get to; sent again after a backoff
    pub unprocessed: Vec<Op::Request>,
    pub consumed_capacity: f64,
}

impl<Op: BatchOperation> BatchResponse<Op> {
    /// Everything processed.
    pub fn complete(processed: Vec<Op::Output>) -> Self {
        Self {
            processed,
            unprocessed: Vec::new(),
            consumed_capacity: 0.0,
        }
    }

    pub fn with_unprocessed(mut self, unprocessed: Vec<Op::Request>) -> Self {
        self.unprocessed = unprocessed;
        self
    }

    pub fn with_capacity(mut self, units: f64) -> Self {
        self.consumed_capacity = units;
        self
    }
}

impl<Op: BatchOperation> std::fmt::Debug for BatchResponse<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResponse")
            .field("processed", &self.processed)
            .field("unprocessed", &self.unprocessed)
            .field("consumed_capacity", &self.consumed_capacity)
            .finish()
    }
}

/// Sends one batch of requests to the store.
#[async_trait]
pub trait BatchTransport<Op: BatchOperation>: Send + Sync {
    async fn send(&self, requests: Vec<Op::Request>) -> Result<BatchResponse<Op>, TransportError>;
}
