/// Test utilities and helpers for KeyMapper testing
///
/// Provides an in-memory store that speaks both batch transports, scripted
/// faults for exercising retries, schema fixtures and value assertions.

use async_trait::async_trait;
use kmap_batch::{BatchRead, BatchResponse, BatchTransport, BatchWrite, TransportError, WriteRequest};
use kmap_core::{EntitySchema, Item, KeySpec, Prop, PropType, Value};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `warn`).
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Scripted behaviour for the next call to a `MockStore`
#[derive(Debug, Clone)]
pub enum Fault {
    /// Hand back the last `n` requests unprocessed
    Unprocessed(usize),
    /// Fail the whole call
    Error(TransportError),
    /// Sleep before answering normally
    Delay(Duration),
}

/// In-memory store keyed by `(pk, sk)`.
#[derive(Default)]
pub struct MockStore {
    items: Mutex<HashMap<String, Item>>,
    faults: Mutex<VecDeque<Fault>>,
    calls: AtomicUsize,
    current: AtomicUsize,
    peak: AtomicUsize,
    sizes: Mutex<Vec<usize>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues faults consumed one per call, in order.
    pub fn with_faults(self, faults: impl IntoIterator<Item = Fault>) -> Self {
        self.faults.lock().extend(faults);
        self
    }

    pub fn insert(&self, item: Item) {
        self.items.lock().insert(storage_key(&item), item);
    }

    pub fn get(&self, key: &Item) -> Option<Item> {
        self.items.lock().get(&storage_key(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Request count of every call, in arrival order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.sizes.lock().clone()
    }

    /// Common call prologue; returns how many trailing requests to hand back.
    async fn enter(&self, size: usize) -> Result<usize, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sizes.lock().push(size);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let fault = self.faults.lock().pop_front();
        // yield so concurrent calls overlap
        tokio::time::sleep(Duration::from_millis(2)).await;

        let outcome = match fault {
            Some(Fault::Unprocessed(n)) => Ok(n.min(size)),
            Some(Fault::Error(error)) => Err(error),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(0)
            }
            None => Ok(0),
        };
        self.current.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl BatchTransport<BatchRead> for MockStore {
    async fn send(&self, mut keys: Vec<Item>) -> Result<BatchResponse<BatchRead>, TransportError> {
        let held = self.enter(keys.len()).await?;
        let unprocessed = keys.split_off(keys.len() - held);
        let found: Vec<Item> = keys.iter().filter_map(|key| self.get(key)).collect();
        let units = keys.len() as f64 * 0.5;
        Ok(BatchResponse::complete(found)
            .with_unprocessed(unprocessed)
            .with_capacity(units))
    }
}

#[async_trait]
impl BatchTransport<BatchWrite> for MockStore {
    async fn send(&self, mut requests: Vec<WriteRequest>) -> Result<BatchResponse<BatchWrite>, TransportError> {
        let held = self.enter(requests.len()).await?;
        let unprocessed = requests.split_off(requests.len() - held);
        {
            let mut items = self.items.lock();
            for request in &requests {
                match request {
                    WriteRequest::Put(item) => {
                        items.insert(storage_key(item), item.clone());
                    }
                    WriteRequest::Delete(key) => {
                        items.remove(&storage_key(key));
                    }
                }
            }
        }
        let units = requests.len() as f64;
        Ok(BatchResponse::complete(requests)
            .with_unprocessed(unprocessed)
            .with_capacity(units))
    }
}

fn storage_key(item: &Item) -> String {
    let part = |name: &str| item.get(name).and_then(Value::as_string).unwrap_or_default().to_string();
    format!("{}|{}", part("pk"), part("sk"))
}

/// Mock data generator for testing
pub struct MockDataGenerator {
    counter: u64,
}

impl MockDataGenerator {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Next document of the `Document` fixture (`repoId`, `docId`, `title`, `created`).
    pub fn document(&mut self) -> Json {
        let idx = self.counter;
        self.counter += 1;
        json!({
            "repoId": format!("repo{}", idx / 10),
            "docId": format!("doc{}", idx),
            "title": format!("title {}", idx),
            "created": 1_700_000_000 + idx,
        })
    }

    /// Encoded primary key (`pk`, `sk`) of a `Document`.
    pub fn document_key(&mut self) -> Item {
        let doc = self.document();
        encode_item(&document_schema(), &doc, true)
    }

    /// Encoded full item of a `Document`.
    pub fn document_item(&mut self) -> Item {
        let doc = self.document();
        encode_item(&document_schema(), &doc, false)
    }
}

impl Default for MockDataGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// `Document` entity: primary key `REPO#repoId` / `DOC#docId`, secondary
/// index on `repoId` / `created`.
pub fn document_schema() -> EntitySchema {
    let props = vec![
        Prop::string("repoId"),
        Prop::string("docId"),
        Prop::string("title"),
        Prop::number("created"),
        Prop::new("tags", PropType::StringSet),
        Prop::number("views"),
    ];
    let keys = [
        KeySpec::with_sk("REPO#repoId", "DOC#docId"),
        KeySpec::with_sk("REPO#repoId", "created"),
    ];
    match EntitySchema::build("Document", "docs", props, &keys) {
        Ok(schema) => schema,
        Err(e) => panic!("Document fixture must build: {}", e),
    }
}

/// Encodes a document under its wire aliases.
///
/// With `key_only` set only the primary key attributes are emitted.
pub fn encode_item(schema: &EntitySchema, doc: &Json, key_only: bool) -> Item {
    let mut item = Item::new();
    let mut put = |prop: &Prop| {
        let encoded = if prop.is_static() {
            Some(prop.static_value())
        } else {
            doc.get(prop.name()).map(|value| {
                prop.encode(value)
                    .unwrap_or_else(|e| panic!("cannot encode {}: {}", prop.name(), e))
            })
        };
        if let Some(encoded) = encoded {
            item.insert(prop.alias.clone(), encoded);
        }
    };

    for index in &schema.indexes {
        if key_only && !index.is_primary() {
            continue;
        }
        for prop in index.key_props() {
            put(prop);
        }
    }
    if !key_only {
        for prop in schema.props.iter().filter(|p| !p.key) {
            put(prop);
        }
    }
    item
}

/// Assert that a value is a number with expected value
pub fn assert_number_eq(value: &Value, expected: &str) {
    match value {
        Value::N(n) => assert_eq!(n, expected),
        _ => panic!("Expected number, got {:?}", value),
    }
}

/// Assert that a value is a string with expected value
pub fn assert_string_eq(value: &Value, expected: &str) {
    match value {
        Value::S(s) => assert_eq!(s, expected),
        _ => panic!("Expected string, got {:?}", value),
    }
}
