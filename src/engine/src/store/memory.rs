use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{DocumentStore, Op, StoreResult};
use common::model::RawRecord;

type Collection = BTreeMap<String, Map<String, Value>>;

/// In-memory document store keyed by entity type, then record id
///
/// Backs the `memory://` DSN and the test suite. Mutation semantics match
/// the production adapter contract: deletes of missing records are no-ops
/// and updates merge fields, creating the record if absent.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly; test and demo setup helper
    pub async fn insert(&self, entity_type: &str, id: &str, fields: Map<String, Value>) {
        let mut collections = self.collections.write().await;
        collections
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Number of records currently stored for an entity type
    pub async fn len(&self, entity_type: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(entity_type).map_or(0, Collection::len)
    }

    pub async fn is_empty(&self, entity_type: &str) -> bool {
        self.len(entity_type).await == 0
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn query(
        &self,
        entity_type: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<RawRecord>> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(entity_type) else {
            return Ok(Vec::new());
        };

        let records = collection
            .iter()
            .filter(|(_, fields)| fields.get(field).and_then(Value::as_str) == Some(value))
            .map(|(id, fields)| RawRecord {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();

        Ok(records)
    }

    async fn batch_apply(&self, entity_type: &str, ops: &[Op]) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(entity_type.to_string()).or_default();

        for op in ops {
            match op {
                Op::Delete { id } => {
                    collection.remove(id);
                }
                Op::Update { id, fields } => {
                    let record = collection.entry(id.clone()).or_default();
                    for (key, value) in fields {
                        record.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        Ok(())
    }

    async fn get(&self, entity_type: &str, id: &str) -> StoreResult<Option<RawRecord>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(entity_type)
            .and_then(|collection| collection.get(id))
            .map(|fields| RawRecord {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn put(
        &self,
        entity_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(entity_type.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        Ok(())
    }
}
