use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use common::model::RawRecord;

/// Error types that can occur during document store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rate limited: {0}")]
    RateLimited(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the error is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable(_) | Self::RateLimited(_)
        )
    }
}

/// Result type for document store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A single write scoped to one entity type
#[derive(Debug, Clone)]
pub enum Op {
    /// Remove the record; removing a missing record is a no-op
    Delete { id: String },
    /// Merge the given fields into the record, creating it if absent
    Update { id: String, fields: Map<String, Value> },
}

/// Narrow adapter over the external document store
///
/// The engine only relies on equality match on one field and batched
/// delete/update by id. No atomicity across entity types is assumed;
/// each call is scoped to a single entity type and every mutation is
/// idempotent, which is what makes cascade steps safe to re-run.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Return all records of `entity_type` whose `field` equals `value`
    async fn query(
        &self,
        entity_type: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<RawRecord>>;

    /// Apply a batch of writes to one entity type
    async fn batch_apply(&self, entity_type: &str, ops: &[Op]) -> StoreResult<()>;

    /// Fetch a single record by id
    async fn get(&self, entity_type: &str, id: &str) -> StoreResult<Option<RawRecord>>;

    /// Upsert a single record, replacing its fields
    async fn put(
        &self,
        entity_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<()>;
}

/// Serialize a value into document fields
pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserialize document fields back into a typed value
pub fn from_document<T: DeserializeOwned>(fields: Map<String, Value>) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(fields))?)
}

pub mod memory;
pub use memory::MemoryStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(StoreError::Unavailable("connection reset".into()).is_transient());
        assert!(StoreError::RateLimited("quota".into()).is_transient());
        assert!(!StoreError::Backend("corrupt index".into()).is_transient());
    }

    #[test]
    fn test_document_conversion_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Doc {
            name: String,
            count: u32,
        }

        let doc = Doc {
            name: "avatar".into(),
            count: 2,
        };
        let fields = to_document(&doc).unwrap();
        assert_eq!(fields["name"], "avatar");

        let back: Doc = from_document(fields).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_non_object_rejected() {
        let result = to_document(&42u32);
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
