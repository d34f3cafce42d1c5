use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Sentinel written into identifying id fields of anonymized records
pub const ANONYMIZED_ID: &str = "deleted-user";

/// Sentinel written into identifying display fields of anonymized records
pub const ANONYMIZED_DISPLAY_NAME: &str = "[Deleted user]";

/// Pseudo entity type used for the credential revocation step result
pub const IDENTITY_STEP: &str = "identity";

/// Role of a data subject; decides which relation entries apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRole {
    Scout,
    Leader,
    Guardian,
}

/// Erasure policy for one entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErasurePolicy {
    /// Remove matching records (and owned blobs) entirely
    HardDelete,
    /// Replace identifying fields with the sentinels, keep content fields
    Anonymize,
    /// Null out foreign-key fields referencing the subject, keep the record
    Detach,
}

/// A schemaless document as returned by the store adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Lifecycle states of an erasure job
///
/// `Complete` and `Failed` are terminal; `Failed` is reserved for
/// non-retriable policy violations. `Partial` jobs resume via the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Partial,
    Complete,
    Failed,
}

/// Outcome of a single cascade step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// Satisfied from the ledger on resume without touching the store
    Skipped,
    Error,
}

/// Classification of a failed step, mirrored into operator-facing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Store failure that survived the retry budget; job resumable
    Transient,
    /// Catalog/config bug; the job will not be retried
    PolicyViolation,
    /// Cascade finished but the credential is still live
    AuthRevocation,
}

/// Result of one relation entry within an erasure job; written once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub entity_type: String,
    pub records_affected: u64,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<StepErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok(entity_type: &str, records_affected: u64) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            records_affected,
            outcome: StepOutcome::Ok,
            error_kind: None,
            error: None,
        }
    }

    pub fn skipped(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            records_affected: 0,
            outcome: StepOutcome::Skipped,
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(entity_type: &str, kind: StepErrorKind, error: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            records_affected: 0,
            outcome: StepOutcome::Error,
            error_kind: Some(kind),
            error: Some(error.into()),
        }
    }
}

/// Snapshot of one subject's erasure job, persisted in the job collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureJob {
    pub job_id: Uuid,
    pub subject_id: String,
    pub role: SubjectRole,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the cascade finished but identity revocation failed;
    /// requires operator escalation, not a silent retry
    #[serde(default)]
    pub auth_revocation_pending: bool,
}

impl ErasureJob {
    pub fn new(subject_id: impl Into<String>, role: SubjectRole) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            role,
            status: JobStatus::Pending,
            steps: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            auth_revocation_pending: false,
        }
    }
}

/// Durable record that a cascade step completed for a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub subject_id: String,
    pub entity_type: String,
    pub completed_at: DateTime<Utc>,
}

/// Portable bundle of a subject's data, generated fresh per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub subject_id: String,
    pub generated_at: DateTime<Utc>,
    pub sections: BTreeMap<String, Vec<RawRecord>>,
}
