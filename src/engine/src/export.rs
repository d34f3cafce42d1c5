use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::catalog::RelationCatalog;
use crate::error::EngineResult;
use crate::store::{DocumentStore, StoreError};
use common::model::{ExportBundle, SubjectRole};

/// Read-only counterpart of the erasure cascade
///
/// Walks the same relation catalog and copies raw records verbatim into
/// the bundle, regardless of erasure policy: export precedes any erasure
/// request, so even anonymize-destined entity types are exported in full.
/// Never touches the ledger or job state.
pub struct ExportAssembler {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<RelationCatalog>,
    max_in_flight: usize,
    op_timeout: Duration,
}

impl ExportAssembler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<RelationCatalog>,
        max_in_flight: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            max_in_flight: max_in_flight.max(1),
            op_timeout,
        }
    }

    /// Build a fresh bundle for one subject
    ///
    /// Section queries are pure reads with no ordering dependency, so
    /// they run concurrently under a bounded fan-out. Any failed section
    /// fails the whole export; a partial bundle would be
    /// indistinguishable from a complete one.
    pub async fn assemble(
        &self,
        subject_id: &str,
        role: SubjectRole,
    ) -> EngineResult<ExportBundle> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut queries = Vec::new();

        for entry in self.catalog.entries_applicable_to(role) {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            let subject = subject_id.to_string();
            let entity_type = entry.entity_type;
            let query_field = entry.query_field;
            let op_timeout = self.op_timeout;

            queries.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| StoreError::Backend("export fan-out closed".to_string()))?;

                let records =
                    match tokio::time::timeout(op_timeout, store.query(entity_type, query_field, &subject))
                        .await
                    {
                        Ok(result) => result?,
                        Err(_) => return Err(StoreError::Timeout(op_timeout)),
                    };

                Ok::<_, StoreError>((entity_type, records))
            });
        }

        let results = futures::future::join_all(queries).await;

        let mut sections: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for result in results {
            let (entity_type, records) = result?;
            sections
                .entry(entity_type.to_string())
                .or_default()
                .extend(records);
        }

        log::info!(
            "assembled export bundle for subject {subject_id}: {} sections",
            sections.len()
        );

        Ok(ExportBundle {
            subject_id: subject_id.to_string(),
            generated_at: Utc::now(),
            sections,
        })
    }
}
