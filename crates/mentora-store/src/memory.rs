//! In-process store implementations.
//!
//! [`MemoryStore`] behaves like the remote document database closely enough
//! for the session core: server timestamps, dot-path updates, merge sets,
//! equality queries with ordering, and atomic batches. It can also inject
//! latency (to expose in-flight races) and outages (to exercise the
//! best-effort paths).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    BatchOp, Direction, Document, DocumentStore, FieldUpdates, FieldValue,
    Fields, LocalStorage, Query, SetMode, StoreError, WriteBatch,
    lookup_path,
};

/// Kinds of operations counted by [`MemoryStore::count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Update,
    Query,
    Commit,
}

type Collection = HashMap<String, Fields>;

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    counts: HashMap<(StoreOp, String), u64>,
    offline: bool,
}

/// A [`DocumentStore`] backed by nested `HashMap`s.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation sleeps for `latency` before touching the data.
    ///
    /// Pair with `#[tokio::test(start_paused = true)]` to keep tests fast.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Simulates losing the connection: every operation fails with
    /// [`StoreError::Unavailable`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Inserts raw fields, bypassing timestamps and counters.
    ///
    /// Used to seed fixtures such as user documents or back-dated sessions.
    pub fn insert(&self, collection: &str, id: &str, data: Fields) {
        self.inner
            .lock()
            .collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), data);
    }

    /// Reads raw fields without counting the access.
    pub fn snapshot(&self, collection: &str, id: &str) -> Option<Fields> {
        self.inner
            .lock()
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// How many operations of `op` touched `collection`.
    pub fn count(&self, op: StoreOp, collection: &str) -> u64 {
        self.inner
            .lock()
            .counts
            .get(&(op, collection.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn record(&mut self, op: StoreOp, collection: &str) {
        *self.counts.entry((op, collection.to_owned())).or_insert(0) += 1;
    }

    fn exists(&self, collection: &str, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|c| c.contains_key(id))
    }

    fn apply_set(
        &mut self,
        collection: &str,
        id: &str,
        fields: &FieldUpdates,
        mode: SetMode,
        now_ms: i64,
    ) {
        let docs = self.collections.entry(collection.to_owned()).or_default();
        let doc = docs.entry(id.to_owned()).or_default();
        if mode == SetMode::Overwrite {
            doc.clear();
        }
        apply_fields(doc, fields, now_ms);
    }

    fn apply_update(
        &mut self,
        collection: &str,
        id: &str,
        fields: &FieldUpdates,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let doc = self
            .collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_owned(),
                id: id.to_owned(),
            })?;
        apply_fields(doc, fields, now_ms);
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn apply_fields(doc: &mut Fields, fields: &FieldUpdates, now_ms: i64) {
    for (path, value) in fields.entries() {
        let value = match value {
            FieldValue::Value(v) => v.clone(),
            FieldValue::ServerTimestamp => Value::from(now_ms),
        };
        set_path(doc, path, value);
    }
}

/// Writes `value` at a dot path, creating intermediate maps as needed.
/// A non-object value sitting on the path is replaced by a map.
fn set_path(doc: &mut Fields, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut current = doc;
    for segment in segments {
        let slot = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !slot.is_object() {
            *slot = Value::Object(Fields::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert(last.to_owned(), value);
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl DocumentStore for MemoryStore {
    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.check_online()?;
        inner.record(StoreOp::Get, collection);
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document {
                id: id.to_owned(),
                data: data.clone(),
            }))
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
        mode: SetMode,
    ) -> Result<(), StoreError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.check_online()?;
        inner.record(StoreOp::Set, collection);
        inner.apply_set(collection, id, &fields, mode, now_millis());
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
    ) -> Result<(), StoreError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.check_online()?;
        inner.record(StoreOp::Update, collection);
        inner.apply_update(collection, id, &fields, now_millis())
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, StoreError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.check_online()?;
        inner.record(StoreOp::Query, collection);

        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Document> = docs
            .iter()
            .filter(|(_, data)| query.matches(data))
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();

        if let Some((path, direction)) = &query.order_by {
            // Documents without the ordering field are excluded, matching
            // how the hosted store treats `orderBy`.
            results.retain(|doc| lookup_path(&doc.data, path).is_some());
            results.sort_by(|a, b| {
                let ord = match (
                    lookup_path(&a.data, path),
                    lookup_path(&b.data, path),
                ) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => Ordering::Equal,
                };
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        } else {
            results.sort_by(|a, b| a.id.cmp(&b.id));
        }

        Ok(results)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.check_online()?;

        // Validate every update target first so a missing document leaves
        // the whole batch unapplied.
        for op in batch.ops() {
            if let BatchOp::Update { collection, id, .. } = op {
                if !inner.exists(collection, id) {
                    return Err(StoreError::NotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        let now_ms = now_millis();
        for op in batch.ops() {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    fields,
                    mode,
                } => {
                    inner.record(StoreOp::Commit, collection);
                    inner.apply_set(collection, id, fields, *mode, now_ms);
                }
                BatchOp::Update {
                    collection,
                    id,
                    fields,
                } => {
                    inner.record(StoreOp::Commit, collection);
                    inner.apply_update(collection, id, fields, now_ms)?;
                }
            }
        }

        tracing::trace!(ops = batch.len(), "batch committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLocalStorage
// ---------------------------------------------------------------------------

/// A [`LocalStorage`] backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryLocalStorage {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail, as a corrupted or locked keystore would.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Reads a key synchronously, for assertions.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if *self.failing.lock() {
            Err(StoreError::Unavailable("local storage failure".into()))
        } else {
            Ok(())
        }
    }
}

impl LocalStorage for MemoryLocalStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set_many(
        &self,
        entries: &[(&str, String)],
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_owned(), value.clone());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.check()?;
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}
