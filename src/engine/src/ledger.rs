use std::sync::Arc;

use chrono::Utc;

use crate::store::{DocumentStore, StoreResult, from_document, to_document};
use common::model::LedgerEntry;

/// Collection holding one document per completed (subject, entity type) step
pub const LEDGER_COLLECTION: &str = "erasure_ledger";

/// Durable, append-only record of completed cascade steps
///
/// Each step is committed with a single-document upsert, so a crash
/// between "data mutated" and "ledger written" resolves by re-running the
/// step; cascade mutations are idempotent by contract. The existence of
/// an entry means the step must not be re-executed on resume.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn doc_id(subject_id: &str, entity_type: &str) -> String {
        format!("{subject_id}:{entity_type}")
    }

    pub async fn has_completed(&self, subject_id: &str, entity_type: &str) -> StoreResult<bool> {
        let id = Self::doc_id(subject_id, entity_type);
        Ok(self.store.get(LEDGER_COLLECTION, &id).await?.is_some())
    }

    pub async fn mark_completed(&self, subject_id: &str, entity_type: &str) -> StoreResult<()> {
        let entry = LedgerEntry {
            subject_id: subject_id.to_string(),
            entity_type: entity_type.to_string(),
            completed_at: Utc::now(),
        };
        let id = Self::doc_id(subject_id, entity_type);
        self.store
            .put(LEDGER_COLLECTION, &id, to_document(&entry)?)
            .await
    }

    pub async fn steps_for(&self, subject_id: &str) -> StoreResult<Vec<LedgerEntry>> {
        let records = self
            .store
            .query(LEDGER_COLLECTION, "subjectId", subject_id)
            .await?;

        records
            .into_iter()
            .map(|record| from_document(record.fields))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_mark_then_has_completed() {
        let ledger = ledger();
        assert!(!ledger.has_completed("s1", "profiles").await.unwrap());

        ledger.mark_completed("s1", "profiles").await.unwrap();
        assert!(ledger.has_completed("s1", "profiles").await.unwrap());

        // Scoped per subject and entity type
        assert!(!ledger.has_completed("s1", "comments").await.unwrap());
        assert!(!ledger.has_completed("s2", "profiles").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_completed_is_idempotent() {
        let ledger = ledger();
        ledger.mark_completed("s1", "profiles").await.unwrap();
        ledger.mark_completed("s1", "profiles").await.unwrap();

        let steps = ledger.steps_for("s1").await.unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn test_steps_for_lists_only_the_subject() {
        let ledger = ledger();
        ledger.mark_completed("s1", "profiles").await.unwrap();
        ledger.mark_completed("s1", "comments").await.unwrap();
        ledger.mark_completed("s2", "profiles").await.unwrap();

        let steps = ledger.steps_for("s1").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|entry| entry.subject_id == "s1"));
    }
}
