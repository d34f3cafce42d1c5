use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::catalog::RelationCatalog;
use crate::error::{EngineError, EngineResult};
use crate::export::ExportAssembler;
use crate::jobs::JobStore;
use crate::orchestrator::{CancelHandle, ErasureOrchestrator};
use crate::revoker::IdentityProvider;
use crate::store::{DocumentStore, StoreError};
use common::Configuration;
use common::model::{ErasureJob, ExportBundle, SubjectRole};

/// The caller-facing surface of the lifecycle engine
///
/// Everything upstream (account-deletion screens, admin tooling) goes
/// through these three operations; the orchestrator, ledger and stores
/// behind them are not part of the integration contract.
pub struct LifecycleService {
    orchestrator: ErasureOrchestrator,
    exporter: ExportAssembler,
    jobs: JobStore,
    limiter: Arc<Semaphore>,
}

impl LifecycleService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
        catalog: RelationCatalog,
        config: &Configuration,
    ) -> Self {
        let catalog = Arc::new(catalog);

        Self {
            orchestrator: ErasureOrchestrator::new(
                store.clone(),
                blobs,
                identity,
                catalog.clone(),
                config.retry.clone(),
                config.store.op_timeout,
            ),
            exporter: ExportAssembler::new(
                store.clone(),
                catalog,
                config.export.max_concurrent_queries,
                config.store.op_timeout,
            ),
            jobs: JobStore::new(store),
            limiter: Arc::new(Semaphore::new(config.jobs.max_concurrent.max(1))),
        }
    }

    /// Run (or resume) the erasure cascade for a subject and return the
    /// job id; inspect progress through [`Self::get_job_status`]
    pub async fn request_erasure(
        &self,
        subject_id: &str,
        role: SubjectRole,
    ) -> EngineResult<Uuid> {
        self.request_erasure_with_cancel(subject_id, role, &CancelHandle::new())
            .await
    }

    /// Like [`Self::request_erasure`], honoring cancellation at step
    /// boundaries
    pub async fn request_erasure_with_cancel(
        &self,
        subject_id: &str,
        role: SubjectRole,
        cancel: &CancelHandle,
    ) -> EngineResult<Uuid> {
        let _permit = self
            .limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Backend("job limiter closed".to_string()))
            .map_err(EngineError::Store)?;

        let job = self.orchestrator.run(subject_id, role, cancel).await?;
        Ok(job.job_id)
    }

    /// Current snapshot of an erasure job
    pub async fn get_job_status(&self, job_id: Uuid) -> EngineResult<ErasureJob> {
        self.jobs
            .find_by_job_id(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    /// Assemble a portable bundle of the subject's data
    pub async fn request_export(
        &self,
        subject_id: &str,
        role: SubjectRole,
    ) -> EngineResult<ExportBundle> {
        self.exporter.assemble(subject_id, role).await
    }
}
