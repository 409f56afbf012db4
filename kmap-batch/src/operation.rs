/// Batch operation descriptors
///
/// The engine is generic over the operation: what a request is, what a
/// processed result is, and how many requests fit in one call.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use kmap_core::Item;

pub trait BatchOperation: Send + Sync + 'static {
    type Request: Clone + Debug + Send + Sync + 'static;
    type Output: Debug + Send + 'static;

    /// Name used in logs
    const NAME: &'static str;
    /// Store limit on requests per call
    const MAX_BATCH_SIZE: usize;
}

/// Batch read of items by primary key
#[derive(Debug, Clone, Copy)]
pub struct BatchRead;

impl BatchOperation for BatchRead {
    /// Encoded primary key
    type Request = Item;
    type Output = Item;

    const NAME: &'static str = "batch_read";
    const MAX_BATCH_SIZE: usize = 100;
}

/// One entry of a batch write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteRequest {
    /// Full item to store
    Put(Item),
    /// Primary key to delete
    Delete(Item),
}

/// Batch of puts and deletes; the output is the saved request.
#[derive(Debug, Clone, Copy)]
pub struct BatchWrite;

impl BatchOperation for BatchWrite {
    type Request = WriteRequest;
    type Output = WriteRequest;

    const NAME: &'static str = "batch_write";
    const MAX_BATCH_SIZE: usize = 25;
}
