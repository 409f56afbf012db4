/// Batch execution engine
///
/// Splits a list of requests into batches, keeps up to `concurrency` of
/// them in flight, re-queues unprocessed and retryable items, and backs off
/// between retries. All in-flight requests are polled from one task, so the
/// run state needs no locking.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::Sleep;

use crate::cancel::CancelToken;
use crate::config::BatchConfig;
use crate::error::{codes, BatchError, Error, Result, TransportError};
use crate::operation::BatchOperation;
use crate::state::{transition, Action, BatchState};
use crate::transport::{BatchResponse, BatchTransport};

/// Lifecycle of one dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    InFlight,
    /// Every item processed
    Succeeded,
    /// Succeeded with unprocessed items re-queued
    Partial,
    /// Failed with a retryable error; items re-queued
    Retrying,
    /// Failed for good; items moved to failures
    Failed,
}

/// Ledger entry, one per dispatched request, in dispatch order
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub seq: u64,
    pub size: usize,
    pub status: BatchStatus,
    pub started: Instant,
    pub elapsed: Option<Duration>,
    pub consumed_capacity: f64,
    /// Items handed back for another attempt
    pub retryable: usize,
}

/// Everything a run produced
#[derive(Debug)]
pub struct BatchOutput<Op: BatchOperation> {
    pub results: Vec<Op::Output>,
    /// Requests that will not be retried
    pub failures: Vec<Op::Request>,
    pub errors: Vec<BatchError>,
    pub ledger: Vec<BatchRecord>,
    /// Number of backoffs taken
    pub retries: u32,
    pub consumed_capacity: f64,
}

impl<Op: BatchOperation> BatchOutput<Op> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.errors.is_empty()
    }
}

struct Completion<Op: BatchOperation> {
    seq: u64,
    /// Backoffs completed when the request was dispatched
    epoch: u64,
    batch: Vec<Op::Request>,
    result: std::result::Result<BatchResponse<Op>, TransportError>,
}

/// Mutable state of one `run` call
struct RunState<Op: BatchOperation> {
    state: BatchState,
    queue: VecDeque<Vec<Op::Request>>,
    in_flight: usize,
    /// Consecutive backoffs since the last clean success
    attempt: u32,
    /// Backoffs waited out so far
    epoch: u64,
    /// Largest delay suggested by the store since the last backoff
    retry_after: Option<Duration>,
    output: BatchOutput<Op>,
}

impl<Op: BatchOperation> RunState<Op> {
    fn new(queue: VecDeque<Vec<Op::Request>>) -> Self {
        Self {
            state: BatchState::Active,
            queue,
            in_flight: 0,
            attempt: 0,
            epoch: 0,
            retry_after: None,
            output: BatchOutput {
                results: Vec::new(),
                failures: Vec::new(),
                errors: Vec::new(),
                ledger: Vec::new(),
                retries: 0,
                consumed_capacity: 0.0,
            },
        }
    }
}

pub struct BatchEngine<Op: BatchOperation> {
    transport: Arc<dyn BatchTransport<Op>>,
    config: BatchConfig,
}

impl<Op: BatchOperation> BatchEngine<Op> {
    pub fn new(transport: Arc<dyn BatchTransport<Op>>, config: BatchConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidConfig)?;
        Ok(Self { transport, config })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.effective_batch_size(Op::MAX_BATCH_SIZE)
    }

    /// Runs every request to completion (or exhaustion / cancellation).
    ///
    /// Never fails as a whole: transport errors, retry exhaustion and
    /// cancellation are recorded in the output.
    pub async fn run(&self, items: Vec<Op::Request>, cancel: Option<CancelToken>) -> BatchOutput<Op> {
        let total = items.len();
        let batch_size = self.batch_size();
        let queue = chunk(items, batch_size);
        let mut run = RunState::<Op>::new(queue);
        let mut in_flight = FuturesUnordered::new();
        let mut timer: Option<Pin<Box<Sleep>>> = None;

        tracing::debug!(
            op = Op::NAME,
            total,
            batch_size,
            concurrency = self.config.concurrency,
            "starting batch run"
        );

        let mut requested = BatchState::Active;
        if cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
            self.record_cancelled(&mut run);
            requested = BatchState::Finished;
        }

        loop {
            let (next, action) = transition(run.state, requested);
            run.state = next;

            match action {
                Action::Dispatch => {
                    timer = None;
                    while run.in_flight < self.config.concurrency {
                        let Some(batch) = run.queue.pop_front() else {
                            break;
                        };
                        let seq = self.open_record(&mut run, batch.len());
                        let epoch = run.epoch;
                        let transport = self.transport.clone();
                        in_flight.push(async move {
                            let result = transport.send(batch.clone()).await;
                            Completion::<Op> { seq, epoch, batch, result }
                        });
                    }
                }
                Action::Backoff => match self.next_delay(&mut run) {
                    Some(delay) => timer = Some(Box::pin(tokio::time::sleep(delay))),
                    None => {
                        requested = BatchState::Finished;
                        continue;
                    }
                },
                Action::Resolve => break,
                Action::None => {}
            }

            if run.state == BatchState::Finished {
                break;
            }
            if run.state == BatchState::Active && run.in_flight == 0 && run.queue.is_empty() {
                requested = BatchState::Finished;
                continue;
            }

            requested = tokio::select! {
                biased;

                _ = cancelled(cancel.as_ref()) => {
                    self.record_cancelled(&mut run);
                    BatchState::Finished
                }
                Some(done) = in_flight.next(), if run.in_flight > 0 => self.complete(&mut run, done),
                _ = backoff(&mut timer) => {
                    timer = None;
                    run.epoch += 1;
                    BatchState::Active
                }
            };
        }

        // Drain; whatever they hand back cannot be retried any more.
        while let Some(done) = in_flight.next().await {
            self.complete(&mut run, done);
        }
        let RunState { queue, mut output, .. } = run;
        output.failures.extend(queue.into_iter().flatten());

        tracing::info!(
            op = Op::NAME,
            total,
            processed = output.results.len(),
            failed = output.failures.len(),
            errors = output.errors.len(),
            batches = output.ledger.len(),
            retries = output.retries,
            "batch run finished"
        );

        output
    }

    fn open_record(&self, run: &mut RunState<Op>, size: usize) -> u64 {
        let seq = run.output.ledger.len() as u64;
        run.output.ledger.push(BatchRecord {
            seq,
            size,
            status: BatchStatus::InFlight,
            started: Instant::now(),
            elapsed: None,
            consumed_capacity: 0.0,
            retryable: 0,
        });
        run.in_flight += 1;
        tracing::debug!(op = Op::NAME, seq, size, "dispatching batch");
        seq
    }

    /// Folds one finished request into the run and returns the state it asks for.
    ///
    /// Only re-queued items request `Blocked`; anything else keeps the current
    /// state, so a backoff in progress is never cut short.
    fn complete(&self, run: &mut RunState<Op>, done: Completion<Op>) -> BatchState {
        let Completion { seq, epoch, batch, result } = done;
        run.in_flight -= 1;

        let (status, capacity, retryable, requested) = match result {
            Ok(response) => {
                let capacity = response.consumed_capacity;
                run.output.results.extend(response.processed);
                run.output.consumed_capacity += capacity;

                let unprocessed = response.unprocessed.len();
                if unprocessed == 0 {
                    // sent after the latest backoff, so the store has recovered
                    if epoch == run.epoch && run.state == BatchState::Active {
                        run.attempt = 0;
                    }
                    (BatchStatus::Succeeded, capacity, 0, run.state)
                } else {
                    tracing::debug!(op = Op::NAME, seq, unprocessed, "re-queueing unprocessed items");
                    run.queue.push_back(response.unprocessed);
                    (BatchStatus::Partial, capacity, unprocessed, BatchState::Blocked)
                }
            }
            Err(error) => {
                tracing::warn!(
                    op = Op::NAME,
                    seq,
                    code = %error.code,
                    status = ?error.status,
                    retryable = error.is_retryable(),
                    "batch request failed: {}",
                    error.message
                );
                run.output.errors.push(BatchError::from_transport(
                    &error,
                    seq,
                    self.config.max_error_message_len,
                ));

                if error.is_retryable() {
                    if let Some(hint) = error.retry_after {
                        run.retry_after = Some(run.retry_after.map_or(hint, |d| d.max(hint)));
                    }
                    let size = batch.len();
                    run.queue.push_back(batch);
                    (BatchStatus::Retrying, 0.0, size, BatchState::Blocked)
                } else {
                    run.output.failures.extend(batch);
                    (BatchStatus::Failed, 0.0, 0, run.state)
                }
            }
        };

        if let Some(record) = run.output.ledger.get_mut(seq as usize) {
            record.status = status;
            record.elapsed = Some(record.started.elapsed());
            record.consumed_capacity = capacity;
            record.retryable = retryable;
        }

        requested
    }

    /// Counts a retry and computes its delay; `None` once retries are exhausted.
    fn next_delay(&self, run: &mut RunState<Op>) -> Option<Duration> {
        let hint = run.retry_after.take();
        match self.config.retry.backoff_with_hint(run.attempt, hint) {
            Some(delay) => {
                run.attempt += 1;
                run.output.retries += 1;
                tracing::warn!(
                    op = Op::NAME,
                    retries = run.output.retries,
                    delay_ms = delay.as_millis() as u64,
                    queued = run.queue.len(),
                    "backing off"
                );
                Some(delay)
            }
            None => {
                tracing::warn!(
                    op = Op::NAME,
                    retries = run.output.retries,
                    "retry limit exceeded, giving up"
                );
                run.output.errors.push(BatchError::engine(
                    codes::RETRY_LIMIT_EXCEEDED,
                    format!("gave up after {} retries", run.output.retries),
                    self.config.max_error_message_len,
                ));
                None
            }
        }
    }

    fn record_cancelled(&self, run: &mut RunState<Op>) {
        tracing::info!(op = Op::NAME, in_flight = run.in_flight, "batch run cancelled");
        run.output.errors.push(BatchError::engine(
            codes::CANCELLED,
            "batch run cancelled",
            self.config.max_error_message_len,
        ));
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> VecDeque<Vec<T>> {
    let mut batches = VecDeque::new();
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push_back(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push_back(current);
    }
    batches
}

async fn cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn backoff(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{BatchRead, BatchWrite, WriteRequest};
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use kmap_core::{Item, Value};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn key(id: usize) -> Item {
        let mut item = Item::new();
        item.insert("pk".to_string(), Value::string(format!("K#{}", id)));
        item
    }

    fn id(item: &Item) -> String {
        item["pk"].as_string().unwrap_or_default().to_string()
    }

    /// Tracks peak concurrency and echoes every write.
    #[derive(Default)]
    struct EchoWrites {
        calls: AtomicUsize,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BatchTransport<BatchWrite> for EchoWrites {
        async fn send(
            &self,
            requests: Vec<WriteRequest>,
        ) -> std::result::Result<BatchResponse<BatchWrite>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            let units = requests.len() as f64;
            Ok(BatchResponse::complete(requests).with_capacity(units))
        }
    }

    #[tokio::test]
    async fn test_write_batches_respect_size_and_concurrency() {
        let transport = Arc::new(EchoWrites::default());
        let config = BatchConfig::new().with_concurrency(3).with_batch_size(25);
        let engine = BatchEngine::<BatchWrite>::new(transport.clone(), config).unwrap();

        let items = (0..150).map(|i| WriteRequest::Put(key(i))).collect();
        let output = engine.run(items, None).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
        assert!(transport.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(output.ledger.len(), 6);
        assert!(output.ledger.iter().all(|r| r.size == 25 && r.status == BatchStatus::Succeeded));
        assert_eq!(output.results.len(), 150);
        assert_eq!(output.retries, 0);
        assert_eq!(output.consumed_capacity, 150.0);
        assert!(output.is_complete());
    }

    #[tokio::test]
    async fn test_batch_size_capped_at_operation_limit() {
        let transport = Arc::new(EchoWrites::default());
        let config = BatchConfig::new().with_batch_size(1000);
        let engine = BatchEngine::<BatchWrite>::new(transport, config).unwrap();
        assert_eq!(engine.batch_size(), 25);

        let items = (0..30).map(|i| WriteRequest::Put(key(i))).collect();
        let output = engine.run(items, None).await;
        let sizes: Vec<_> = output.ledger.iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![25, 5]);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let engine = BatchEngine::<BatchWrite>::new(Arc::new(EchoWrites::default()), BatchConfig::new()).unwrap();
        let output = engine.run(Vec::new(), None).await;
        assert!(output.ledger.is_empty());
        assert!(output.is_complete());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BatchEngine::<BatchWrite>::new(
            Arc::new(EchoWrites::default()),
            BatchConfig::new().with_concurrency(0),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    /// Holds back one key on the first call.
    struct HoldBackOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchTransport<BatchRead> for HoldBackOnce {
        async fn send(&self, mut keys: Vec<Item>) -> std::result::Result<BatchResponse<BatchRead>, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let held = keys.split_off(keys.len() - 1);
                return Ok(BatchResponse::complete(keys).with_unprocessed(held));
            }
            Ok(BatchResponse::complete(keys))
        }
    }

    #[tokio::test]
    async fn test_unprocessed_key_is_retried() {
        let transport = Arc::new(HoldBackOnce { calls: AtomicUsize::new(0) });
        let config = BatchConfig::new().with_retry_policy(RetryPolicy::fast());
        let engine = BatchEngine::<BatchRead>::new(transport, config).unwrap();

        let keys: Vec<Item> = (0..3).map(key).collect();
        let output = engine.run(keys, None).await;

        assert_eq!(output.retries, 1);
        assert_eq!(output.ledger.len(), 2);
        assert_eq!(output.ledger[0].status, BatchStatus::Partial);
        assert_eq!(output.ledger[0].retryable, 1);
        assert_eq!(output.ledger[1].size, 1);
        let ids: HashSet<_> = output.results.iter().map(id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("K#2"));
        assert!(output.is_complete());
    }

    /// Fails every batch with the configured error.
    struct AlwaysFails {
        error: TransportError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchTransport<BatchRead> for AlwaysFails {
        async fn send(&self, _keys: Vec<Item>) -> std::result::Result<BatchResponse<BatchRead>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    #[tokio::test]
    async fn test_non_retryable_failure_moves_items_to_failures() {
        let transport = Arc::new(AlwaysFails {
            error: TransportError::new("ValidationException", "bad\nkey"),
            calls: AtomicUsize::new(0),
        });
        let engine = BatchEngine::<BatchRead>::new(transport.clone(), BatchConfig::new()).unwrap();

        let output = engine.run((0..5).map(key).collect(), None).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.failures.len(), 5);
        assert_eq!(output.retries, 0);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].code, "ValidationException");
        assert_eq!(output.errors[0].message, "bad key");
        assert_eq!(output.errors[0].batch, Some(0));
        assert_eq!(output.ledger[0].status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_limit_exceeded() {
        let transport = Arc::new(AlwaysFails {
            error: TransportError::throttled(&"x".repeat(400)),
            calls: AtomicUsize::new(0),
        });
        // 1ms, 2ms, 4ms, then past the ceiling
        let config = BatchConfig::new().with_retry_policy(RetryPolicy::new(1, 5, 2.0));
        let engine = BatchEngine::<BatchRead>::new(transport.clone(), config).unwrap();

        let output = engine.run((0..2).map(key).collect(), None).await;

        assert_eq!(output.retries, 3);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        assert_eq!(output.failures.len(), 2);
        assert!(output.results.is_empty());

        let last = output.errors.last().unwrap();
        assert_eq!(last.code, codes::RETRY_LIMIT_EXCEEDED);
        assert!(output.errors[0].message.chars().count() <= 256);
        assert!(output.errors[0].retryable);
    }

    #[tokio::test]
    async fn test_no_retry_policy_gives_up_immediately() {
        let transport = Arc::new(AlwaysFails {
            error: TransportError::throttled("slow down"),
            calls: AtomicUsize::new(0),
        });
        let config = BatchConfig::new().with_retry_policy(RetryPolicy::no_retry());
        let engine = BatchEngine::<BatchRead>::new(transport.clone(), config).unwrap();

        let output = engine.run(vec![key(1)], None).await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.retries, 0);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.errors.len(), 2);
        assert_eq!(output.errors[1].code, codes::RETRY_LIMIT_EXCEEDED);
    }

    /// Throttles with a retry-after hint on the first call.
    struct ThrottleOnce {
        calls: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl BatchTransport<BatchRead> for ThrottleOnce {
        async fn send(&self, keys: Vec<Item>) -> std::result::Result<BatchResponse<BatchRead>, TransportError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len() == 1
            };
            if first {
                return Err(TransportError::throttled("slow down").with_retry_after(Duration::from_millis(40)));
            }
            Ok(BatchResponse::complete(keys))
        }
    }

    #[tokio::test]
    async fn test_retry_after_hint_is_honoured() {
        let transport = Arc::new(ThrottleOnce { calls: Mutex::new(Vec::new()) });
        let config = BatchConfig::new().with_retry_policy(RetryPolicy::new(1, 1000, 2.0));
        let engine = BatchEngine::<BatchRead>::new(transport.clone(), config).unwrap();

        let output = engine.run(vec![key(1)], None).await;
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.retries, 1);
        assert_eq!(output.ledger[0].status, BatchStatus::Retrying);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].duration_since(calls[0]) >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_sends_nothing() {
        let transport = Arc::new(EchoWrites::default());
        let engine = BatchEngine::<BatchWrite>::new(transport.clone(), BatchConfig::new()).unwrap();
        let token = CancelToken::new();
        token.cancel();

        let items = (0..10).map(|i| WriteRequest::Put(key(i))).collect();
        let output = engine.run(items, Some(token)).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(output.failures.len(), 10);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].code, codes::CANCELLED);
    }

    #[test]
    fn test_chunk() {
        let batches = chunk((0..7).collect(), 3);
        assert_eq!(batches, VecDeque::from(vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]));
        assert!(chunk(Vec::<u8>::new(), 3).is_empty());
    }
}
