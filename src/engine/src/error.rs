use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::store::StoreError;

/// Errors surfaced by the caller-facing lifecycle operations
///
/// Step-level failures inside a running cascade are not errors at this
/// level: they are recorded as step results on the job snapshot and
/// surfaced through job status, so a partial cascade still returns its
/// job id to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Concurrent erasure request for a subject already being processed;
    /// surfaced immediately, no job state change
    #[error("an erasure job is already running for subject '{0}'")]
    JobAlreadyRunning(String),

    #[error("no erasure job found for job id {0}")]
    JobNotFound(Uuid),

    #[error("relation catalog violation: {0}")]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for caller-facing lifecycle operations
pub type EngineResult<T> = Result<T, EngineError>;
