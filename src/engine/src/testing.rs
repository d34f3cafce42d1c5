//! Instrumented doubles for exercising the lifecycle engine.
//!
//! Available to dependent crates through the `testing` feature; the
//! integration suite uses these to observe call counts, inject transient
//! failures and trace the relative order of blob and document writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::blob::BlobStore;
use crate::store::{DocumentStore, Op, StoreError, StoreResult};
use common::model::RawRecord;

/// Shared, ordered trace of adapter operations
#[derive(Clone, Debug, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().expect("op log lock").push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().expect("op log lock").clone()
    }

    /// Position of the first event containing the needle
    pub fn position_of(&self, needle: &str) -> Option<usize> {
        self.events().iter().position(|event| event.contains(needle))
    }
}

/// Document store wrapper with per-entity-type failure injection,
/// per-method call counts, optional latency and op tracing
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    failures: Mutex<HashMap<String, u32>>,
    counts: Mutex<HashMap<(String, String), u32>>,
    latency: Mutex<Option<Duration>>,
    log: Option<OpLog>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            log: None,
        }
    }

    pub fn with_op_log(inner: Arc<dyn DocumentStore>, log: OpLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new(inner)
        }
    }

    /// Make the next `n` operations on `entity_type` fail as transient
    pub fn fail_times(&self, entity_type: &str, n: u32) {
        self.failures
            .lock()
            .expect("failure plan lock")
            .insert(entity_type.to_string(), n);
    }

    /// Sleep before every operation; lets tests hold a job in flight
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency lock") = Some(latency);
    }

    /// Calls observed for a (method, entity type) pair
    pub fn calls(&self, method: &str, entity_type: &str) -> u32 {
        self.counts
            .lock()
            .expect("count lock")
            .get(&(method.to_string(), entity_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn observe(&self, method: &str, entity_type: &str) -> StoreResult<()> {
        let latency = *self.latency.lock().expect("latency lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        *self
            .counts
            .lock()
            .expect("count lock")
            .entry((method.to_string(), entity_type.to_string()))
            .or_insert(0) += 1;

        if let Some(log) = &self.log {
            log.record(format!("store:{method}:{entity_type}"));
        }

        let mut failures = self.failures.lock().expect("failure plan lock");
        if let Some(remaining) = failures.get_mut(entity_type) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!(
                    "injected failure on {entity_type}"
                )));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn query(
        &self,
        entity_type: &str,
        field: &str,
        value: &str,
    ) -> StoreResult<Vec<RawRecord>> {
        self.observe("query", entity_type).await?;
        self.inner.query(entity_type, field, value).await
    }

    async fn batch_apply(&self, entity_type: &str, ops: &[Op]) -> StoreResult<()> {
        self.observe("batch_apply", entity_type).await?;
        self.inner.batch_apply(entity_type, ops).await
    }

    async fn get(&self, entity_type: &str, id: &str) -> StoreResult<Option<RawRecord>> {
        self.observe("get", entity_type).await?;
        self.inner.get(entity_type, id).await
    }

    async fn put(
        &self,
        entity_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<()> {
        self.observe("put", entity_type).await?;
        self.inner.put(entity_type, id, fields).await
    }
}

/// Blob store wrapper recording deletions into an op log
pub struct RecordingBlobStore {
    inner: Arc<dyn BlobStore>,
    log: OpLog,
}

impl RecordingBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, log: OpLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        self.log.record(format!("blob:delete_prefix:{prefix}"));
        self.inner.delete_prefix(prefix).await
    }
}
