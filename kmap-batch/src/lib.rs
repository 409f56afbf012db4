//! Batch execution for KeyMapper
//!
//! Runs batch reads and batch writes against a store through a pluggable
//! [`BatchTransport`], with bounded concurrency, re-queueing of unprocessed
//! items and exponential backoff.

pub mod error;
pub mod retry;
pub mod config;
pub mod operation;
pub mod transport;
pub mod state; // Active / Blocked / Finished
pub mod cancel;
pub mod engine;

pub use cancel::CancelToken;
pub use config::BatchConfig;
pub use engine::{BatchEngine, BatchOutput, BatchRecord, BatchStatus};
pub use error::{codes, BatchError, Error, Result, TransportError};
pub use operation::{BatchOperation, BatchRead, BatchWrite, WriteRequest};
pub use retry::RetryPolicy;
pub use state::{transition, Action, BatchState};
pub use transport::{BatchResponse, BatchTransport};
