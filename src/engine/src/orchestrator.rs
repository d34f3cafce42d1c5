use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::blob::BlobStore;
use crate::catalog::{RelationCatalog, RelationEntry};
use crate::error::{EngineError, EngineResult};
use crate::jobs::JobStore;
use crate::ledger::Ledger;
use crate::revoker::IdentityProvider;
use crate::store::{DocumentStore, Op, StoreError};
use common::config::RetryConfig;
use common::model::{
    ErasurePolicy, ErasureJob, IDENTITY_STEP, JobStatus, StepErrorKind, StepResult, SubjectRole,
};

/// Cooperative cancellation for an in-flight erasure job
///
/// Honored only at the boundary between steps; a step's batch write is
/// atomic from the caller's perspective. A cancelled job is left Partial
/// and resumes like any other partial job.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a cascade step gave up
enum StepFailure {
    /// Store error, either non-retriable or past the retry budget
    Store(StoreError),
    /// Catalog/config bug; the job must not be retried
    Policy(String),
}

/// Drives a per-subject erasure job through the relation catalog
///
/// State machine: Pending -> InProgress -> {Complete | Partial | Failed},
/// with Partial -> InProgress on resume. The ledger makes resumed steps
/// no-ops, giving at-least-once step execution with effectively-once
/// outcomes.
pub struct ErasureOrchestrator {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    ledger: Ledger,
    jobs: JobStore,
    catalog: Arc<RelationCatalog>,
    identity: Arc<dyn IdentityProvider>,
    retry: RetryConfig,
    op_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ErasureOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
        catalog: Arc<RelationCatalog>,
        retry: RetryConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            ledger: Ledger::new(store.clone()),
            jobs: JobStore::new(store.clone()),
            store,
            blobs,
            catalog,
            identity,
            retry,
            op_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run (or resume) the erasure cascade for one subject
    ///
    /// Rejects a concurrent job for the same subject with
    /// `JobAlreadyRunning` without touching job state. All other outcomes
    /// are recorded on the returned job snapshot.
    pub async fn run(
        &self,
        subject_id: &str,
        role: SubjectRole,
        cancel: &CancelHandle,
    ) -> EngineResult<ErasureJob> {
        let _guard = self.try_lock_subject(subject_id).await?;
        self.run_locked(subject_id, role, cancel).await
    }

    async fn try_lock_subject(&self, subject_id: &str) -> EngineResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(subject_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        lock.try_lock_owned()
            .map_err(|_| EngineError::JobAlreadyRunning(subject_id.to_string()))
    }

    async fn run_locked(
        &self,
        subject_id: &str,
        role: SubjectRole,
        cancel: &CancelHandle,
    ) -> EngineResult<ErasureJob> {
        let mut job = match self.jobs.load(subject_id).await? {
            Some(mut existing) => {
                log::info!(
                    "resuming erasure job {} for subject {subject_id} (was {:?})",
                    existing.job_id,
                    existing.status
                );
                existing.steps.clear();
                existing.role = role;
                existing
            }
            None => {
                let job = ErasureJob::new(subject_id, role);
                log::info!("created erasure job {} for subject {subject_id}", job.job_id);
                job
            }
        };

        job.status = JobStatus::InProgress;
        self.jobs.save(&job).await?;

        for entry in self.catalog.entries_applicable_to(role) {
            if cancel.is_cancelled() {
                log::warn!(
                    "erasure job {} cancelled before step {}; leaving job partial",
                    job.job_id,
                    entry.entity_type
                );
                job.status = JobStatus::Partial;
                self.jobs.save(&job).await?;
                return Ok(job);
            }

            match self.run_step(subject_id, entry).await {
                Ok(step) => {
                    job.steps.push(step);
                    self.jobs.save(&job).await?;
                }
                Err(StepFailure::Store(e)) => {
                    log::error!(
                        "erasure step {} for subject {subject_id} failed: {e}; halting cascade",
                        entry.entity_type
                    );
                    job.steps.push(StepResult::failed(
                        entry.entity_type,
                        StepErrorKind::Transient,
                        e.to_string(),
                    ));
                    job.status = JobStatus::Partial;
                    self.jobs.save(&job).await?;
                    return Ok(job);
                }
                Err(StepFailure::Policy(message)) => {
                    log::error!(
                        "relation entry {} violates catalog policy: {message}",
                        entry.entity_type
                    );
                    job.steps.push(StepResult::failed(
                        entry.entity_type,
                        StepErrorKind::PolicyViolation,
                        message,
                    ));
                    job.status = JobStatus::Failed;
                    self.jobs.save(&job).await?;
                    return Ok(job);
                }
            }
        }

        // Credentials go last: earlier steps may need the identity to
        // still be valid for queries against the external stores.
        match self.identity.revoke_identity(subject_id).await {
            Ok(()) => {
                job.status = JobStatus::Complete;
                job.completed_at = Some(Utc::now());
                job.auth_revocation_pending = false;
                log::info!("erasure job {} complete for subject {subject_id}", job.job_id);
            }
            Err(e) => {
                log::error!(
                    "cascade for subject {subject_id} finished but identity revocation \
                     failed: {e}; credential must be disabled manually"
                );
                job.steps.push(StepResult::failed(
                    IDENTITY_STEP,
                    StepErrorKind::AuthRevocation,
                    e.to_string(),
                ));
                job.status = JobStatus::Partial;
                job.auth_revocation_pending = true;
            }
        }

        self.jobs.save(&job).await?;
        Ok(job)
    }

    /// Execute one relation entry with bounded-backoff retries
    async fn run_step(
        &self,
        subject_id: &str,
        entry: &RelationEntry,
    ) -> Result<StepResult, StepFailure> {
        validate_entry(entry).map_err(StepFailure::Policy)?;

        let mut attempt = 1u32;
        loop {
            match self.try_step(subject_id, entry).await {
                Ok(step) => return Ok(step),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "transient store error on step {} for subject {subject_id} \
                         (attempt {attempt}/{}): {e}; retrying after {delay:?}",
                        entry.entity_type,
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(StepFailure::Store(e)),
            }
        }
    }

    /// One attempt at a step: ledger check, query, policy application,
    /// ledger commit
    async fn try_step(
        &self,
        subject_id: &str,
        entry: &RelationEntry,
    ) -> Result<StepResult, StoreError> {
        if self
            .timed(self.ledger.has_completed(subject_id, entry.entity_type))
            .await?
        {
            log::debug!(
                "step {} already completed for subject {subject_id}; skipping",
                entry.entity_type
            );
            return Ok(StepResult::skipped(entry.entity_type));
        }

        let records = self
            .timed(
                self.store
                    .query(entry.entity_type, entry.query_field, subject_id),
            )
            .await?;
        let affected = records.len() as u64;

        match entry.policy {
            ErasurePolicy::HardDelete => {
                // Blobs first: a crash here leaves an orphaned document,
                // which the resumed step still discovers by query.
                if let Some(prefix) = entry.blob_prefix_for(subject_id) {
                    self.timed(self.blobs.delete_prefix(&prefix)).await?;
                }
                if !records.is_empty() {
                    let ops: Vec<Op> = records
                        .iter()
                        .map(|record| Op::Delete {
                            id: record.id.clone(),
                        })
                        .collect();
                    self.timed(self.store.batch_apply(entry.entity_type, &ops))
                        .await?;
                }
            }
            ErasurePolicy::Anonymize => {
                if !records.is_empty() {
                    let mut fields = Map::new();
                    for (field, sentinel) in entry.anonymize_fields {
                        fields.insert((*field).to_string(), Value::String((*sentinel).to_string()));
                    }
                    let ops: Vec<Op> = records
                        .iter()
                        .map(|record| Op::Update {
                            id: record.id.clone(),
                            fields: fields.clone(),
                        })
                        .collect();
                    self.timed(self.store.batch_apply(entry.entity_type, &ops))
                        .await?;
                }
            }
            ErasurePolicy::Detach => {
                if !records.is_empty() {
                    let mut fields = Map::new();
                    for field in entry.detach_fields {
                        fields.insert((*field).to_string(), Value::Null);
                    }
                    let ops: Vec<Op> = records
                        .iter()
                        .map(|record| Op::Update {
                            id: record.id.clone(),
                            fields: fields.clone(),
                        })
                        .collect();
                    self.timed(self.store.batch_apply(entry.entity_type, &ops))
                        .await?;
                }
            }
        }

        self.timed(self.ledger.mark_completed(subject_id, entry.entity_type))
            .await?;

        log::debug!(
            "step {} for subject {subject_id} affected {affected} records",
            entry.entity_type
        );
        Ok(StepResult::ok(entry.entity_type, affected))
    }

    async fn timed<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

/// Reject incoherent relation entries before touching any data
fn validate_entry(entry: &RelationEntry) -> Result<(), String> {
    match entry.policy {
        ErasurePolicy::Anonymize if entry.anonymize_fields.is_empty() => Err(format!(
            "anonymize entry '{}' names no identifying fields",
            entry.entity_type
        )),
        ErasurePolicy::Detach if entry.detach_fields.is_empty() => Err(format!(
            "detach entry '{}' names no foreign-key fields",
            entry.entity_type
        )),
        ErasurePolicy::Anonymize | ErasurePolicy::Detach if entry.blob_prefix.is_some() => {
            Err(format!(
                "entry '{}' owns blobs but is not hard-deleted",
                entry.entity_type
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ObjectBlobStore;
    use crate::revoker::{RevokeError, StaticIdentityProvider};
    use crate::store::MemoryStore;
    use crate::testing::FlakyStore;
    use async_trait::async_trait;
    use serde_json::json;

    mockall::mock! {
        Identity {}

        #[async_trait]
        impl IdentityProvider for Identity {
            async fn revoke_identity(&self, subject_id: &str) -> Result<(), RevokeError>;
        }
    }

    fn catalog(entries: Vec<RelationEntry>) -> Arc<RelationCatalog> {
        Arc::new(RelationCatalog::new(entries).unwrap())
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn orchestrator(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        catalog: Arc<RelationCatalog>,
    ) -> ErasureOrchestrator {
        let blobs = Arc::new(ObjectBlobStore::new(Arc::new(
            object_store::memory::InMemory::new(),
        )));
        ErasureOrchestrator::new(
            store,
            blobs,
            identity,
            catalog,
            fast_retry(),
            Duration::from_secs(2),
        )
    }

    fn hard_delete_entry(entity_type: &'static str, order: u32) -> RelationEntry {
        RelationEntry {
            entity_type,
            query_field: "subjectId",
            policy: ErasurePolicy::HardDelete,
            order,
            roles: &[],
            blob_prefix: None,
            anonymize_fields: &[],
            detach_fields: &[],
        }
    }

    async fn seed(store: &MemoryStore, entity_type: &str, id: &str, subject: &str) {
        let mut fields = Map::new();
        fields.insert("subjectId".to_string(), json!(subject));
        store.insert(entity_type, id, fields).await;
    }

    #[tokio::test]
    async fn test_policy_violation_fails_job_and_halts() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "broken", "r1", "s1").await;
        seed(&store, "after", "r2", "s1").await;

        let bad_entry = RelationEntry {
            entity_type: "broken",
            query_field: "subjectId",
            policy: ErasurePolicy::Anonymize,
            order: 10,
            roles: &[],
            blob_prefix: None,
            anonymize_fields: &[],
            detach_fields: &[],
        };
        let catalog = catalog(vec![bad_entry, hard_delete_entry("after", 20)]);

        let identity = Arc::new(StaticIdentityProvider::new());
        let orchestrator = orchestrator(store.clone(), identity.clone(), catalog);

        let job = orchestrator
            .run("s1", SubjectRole::Scout, &CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.steps.len(), 1);
        assert_eq!(job.steps[0].error_kind, Some(StepErrorKind::PolicyViolation));
        // Later entries never ran and the credential is untouched
        assert_eq!(store.len("after").await, 1);
        assert!(!identity.is_revoked("s1").await);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_within_budget() {
        let inner = Arc::new(MemoryStore::new());
        seed(&inner, "healthRecords", "h1", "s1").await;

        let flaky = Arc::new(FlakyStore::new(inner));
        flaky.fail_times("healthRecords", 1);

        let catalog = catalog(vec![hard_delete_entry("healthRecords", 10)]);
        let identity = Arc::new(StaticIdentityProvider::new());
        let orchestrator = orchestrator(flaky.clone(), identity, catalog);

        let job = orchestrator
            .run("s1", SubjectRole::Scout, &CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        // First query attempt failed, second succeeded
        assert_eq!(flaky.calls("query", "healthRecords"), 2);
    }

    #[tokio::test]
    async fn test_identity_revoked_exactly_once_after_cascade() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "healthRecords", "h1", "s1").await;

        let mut identity = MockIdentity::new();
        identity
            .expect_revoke_identity()
            .times(1)
            .withf(|subject| subject == "s1")
            .returning(|_| Ok(()));

        let catalog = catalog(vec![hard_delete_entry("healthRecords", 10)]);
        let orchestrator = orchestrator(store, Arc::new(identity), catalog);

        let job = orchestrator
            .run("s1", SubjectRole::Scout, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_identity_not_revoked_when_a_step_fails() {
        let inner = Arc::new(MemoryStore::new());
        seed(&inner, "healthRecords", "h1", "s1").await;

        let flaky = Arc::new(FlakyStore::new(inner));
        // More failures than the retry budget allows
        flaky.fail_times("healthRecords", 10);

        let mut identity = MockIdentity::new();
        identity.expect_revoke_identity().times(0);

        let catalog = catalog(vec![hard_delete_entry("healthRecords", 10)]);
        let orchestrator = orchestrator(flaky, Arc::new(identity), catalog);

        let job = orchestrator
            .run("s1", SubjectRole::Scout, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Partial);
        assert_eq!(job.steps.last().unwrap().error_kind, Some(StepErrorKind::Transient));
    }

    #[tokio::test]
    async fn test_cancellation_between_steps_leaves_job_partial() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "healthRecords", "h1", "s1").await;

        let catalog = catalog(vec![hard_delete_entry("healthRecords", 10)]);
        let identity = Arc::new(StaticIdentityProvider::new());
        let orchestrator = orchestrator(store.clone(), identity.clone(), catalog);

        let cancel = CancelHandle::new();
        cancel.cancel();

        let job = orchestrator.run("s1", SubjectRole::Scout, &cancel).await.unwrap();
        assert_eq!(job.status, JobStatus::Partial);
        assert!(job.steps.is_empty());
        assert_eq!(store.len("healthRecords").await, 1);

        // Resumes like any partial job
        let job = orchestrator
            .run("s1", SubjectRole::Scout, &CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(store.len("healthRecords").await, 0);
        assert!(identity.is_revoked("s1").await);
    }
}
