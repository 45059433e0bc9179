//! Storage abstractions for Mentora.
//!
//! Provides the [`DocumentStore`] and [`LocalStorage`] traits that abstract
//! over the two places session state lives: the remote document database
//! (one record per user-device pair) and the device's own key-value store
//! (tokens, device id).
//!
//! # Feature Flags
//!
//! - `memory` (default) — in-process implementations ([`MemoryStore`],
//!   [`MemoryLocalStorage`]) used by tests and the walkthrough demo.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::StoreError;
#[cfg(feature = "memory")]
pub use memory::{MemoryLocalStorage, MemoryStore, StoreOp};

use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A document read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    /// Deserializes the document's fields into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(|e| StoreError::InvalidData(format!("{}: {e}", self.id)))
    }

    /// Looks up a field by dot-separated path (`"deviceInfo.model"`).
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }
}

/// Resolves a dot-separated path inside a field map.
pub fn lookup_path<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// The value written to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A literal JSON value.
    Value(Value),
    /// Replaced by the store's own clock at write time (epoch millis).
    ServerTimestamp,
}

/// An ordered list of field writes.
///
/// Keys may be dot paths: `"unreadCount.u1"` updates a single entry of a
/// nested map without touching its siblings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdates {
    entries: Vec<(String, FieldValue)>,
}

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a literal value at `path`.
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((path.into(), FieldValue::Value(value.into())));
        self
    }

    /// Writes the store's current time at `path`.
    pub fn server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.entries.push((path.into(), FieldValue::ServerTimestamp));
        self
    }

    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How [`DocumentStore::set`] treats an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Replace the whole document.
    #[default]
    Overwrite,
    /// Write only the given fields, keeping the rest.
    Merge,
}

/// A group of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        collection: String,
        id: String,
        fields: FieldUpdates,
        mode: SetMode,
    },
    Update {
        collection: String,
        id: String,
        fields: FieldUpdates,
    },
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
        mode: SetMode,
    ) -> &mut Self {
        self.ops.push(BatchOp::Set {
            collection: collection.to_owned(),
            id: id.to_owned(),
            fields,
            mode,
        });
        self
    }

    pub fn update(
        &mut self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
    ) -> &mut Self {
        self.ops.push(BatchOp::Update {
            collection: collection.to_owned(),
            id: id.to_owned(),
            fields,
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Sort direction for [`Query::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filters plus an optional single ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((path.into(), value.into()));
        self
    }

    pub fn order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((path.into(), direction));
        self
    }

    /// Returns `true` if every filter matches the given fields.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|(path, expected)| lookup_path(fields, path) == Some(expected))
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The remote document database.
///
/// Implementations are shared across tasks, hence `Send + Sync + 'static`,
/// and every method returns a `Send` future so callers can be spawned.
pub trait DocumentStore: Send + Sync + 'static {
    /// Reads one document. `Ok(None)` if it does not exist.
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<Document>, StoreError>> + Send;

    /// Creates or replaces (or merges into) a document.
    fn set(
        &self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
        mode: SetMode,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Partially updates an existing document.
    ///
    /// Fails with [`StoreError::NotFound`] if the document is missing.
    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: FieldUpdates,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns every document matching the query's filters, in the
    /// query's order.
    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, StoreError>> + Send;

    /// Applies all writes in the batch, or none of them.
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// The device's local key-value storage.
pub trait LocalStorage: Send + Sync + 'static {
    /// Reads one key.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Writes several keys in one call.
    fn set_many(
        &self,
        entries: &[(&str, String)],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes several keys in one call. Missing keys are ignored.
    fn remove_many(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads several keys, preserving order.
    fn get_many(
        &self,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<Option<String>>, StoreError>> + Send {
        async move {
            let mut values = Vec::with_capacity(keys.len());
            for key in keys {
                values.push(self.get(key).await?);
            }
            Ok(values)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_lookup_path_nested() {
        let data = fields(json!({"deviceInfo": {"model": "Pixel"}}));
        assert_eq!(lookup_path(&data, "deviceInfo.model"), Some(&json!("Pixel")));
        assert_eq!(lookup_path(&data, "deviceInfo.brand"), None);
        assert_eq!(lookup_path(&data, "missing.path"), None);
    }

    #[test]
    fn test_query_matches_all_filters() {
        let data = fields(json!({"userId": "u1", "isActive": true}));
        let q = Query::new().where_eq("userId", "u1").where_eq("isActive", true);
        assert!(q.matches(&data));

        let q = Query::new().where_eq("userId", "u1").where_eq("isActive", false);
        assert!(!q.matches(&data));
    }

    #[test]
    fn test_document_decode_reports_id_on_failure() {
        let doc = Document {
            id: "u1_d1".into(),
            data: fields(json!({"unexpected": 1})),
        };
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Needs {
            required: String,
        }
        let err = doc.decode::<Needs>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(msg) if msg.contains("u1_d1")));
    }

    #[test]
    fn test_write_batch_collects_ops_in_order() {
        let mut batch = WriteBatch::new();
        batch
            .update("c", "a", FieldUpdates::new().set("x", 1))
            .update("c", "b", FieldUpdates::new().set("x", 2));
        assert_eq!(batch.len(), 2);
        assert!(matches!(&batch.ops()[0], BatchOp::Update { id, .. } if id == "a"));
    }
}
