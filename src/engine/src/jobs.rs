use std::sync::Arc;

use uuid::Uuid;

use crate::store::{DocumentStore, StoreResult, from_document, to_document};
use common::model::ErasureJob;

/// Collection holding the current job snapshot per subject
pub const JOB_COLLECTION: &str = "erasure_jobs";

/// Persistence for erasure job snapshots
///
/// One live job per subject: the document id is the subject id, and the
/// job id is kept as a field so status lookups by job id resolve with a
/// field query.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn DocumentStore>,
}

impl JobStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self, subject_id: &str) -> StoreResult<Option<ErasureJob>> {
        match self.store.get(JOB_COLLECTION, subject_id).await? {
            Some(record) => Ok(Some(from_document(record.fields)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, job: &ErasureJob) -> StoreResult<()> {
        self.store
            .put(JOB_COLLECTION, &job.subject_id, to_document(job)?)
            .await
    }

    pub async fn find_by_job_id(&self, job_id: Uuid) -> StoreResult<Option<ErasureJob>> {
        let records = self
            .store
            .query(JOB_COLLECTION, "jobId", &job_id.to_string())
            .await?;

        match records.into_iter().next() {
            Some(record) => Ok(Some(from_document(record.fields)?)),
            None => Ok(None),
        }
    }
}
