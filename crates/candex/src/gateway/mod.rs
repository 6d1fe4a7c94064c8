//! Narrow interfaces to the persistence and relationship-management
//! systems, plus the domain records that cross them.
//!
//! The orchestration core is parametrized entirely by these traits; the
//! `db` module ships a SQLite-backed implementation of the store traits,
//! while the CRM side is supplied by the host.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{CandidateProfile, DocumentType};
use crate::identity::{DocumentMeta, MergedIdentity};
use crate::retry::{ExternalError, RetryHint};

/// Failure crossing a gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Local backend failure (database, filesystem). Not retryable.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Remote call answered with an error status.
    #[error("remote call failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// Remote call never answered.
    #[error("remote call timed out: {0}")]
    Timeout(String),
}

impl ExternalError for GatewayError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            GatewayError::Backend(_) => RetryHint::Fatal,
            GatewayError::Http { status, .. } => RetryHint::Status(*status),
            GatewayError::Timeout(_) => RetryHint::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    AwaitingInput,
    Complete,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::AwaitingInput => "awaiting_input",
            BatchStatus::Complete => "complete",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "awaiting_input" => Some(BatchStatus::AwaitingInput),
            "complete" => Some(BatchStatus::Complete),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Complete,
    Failed,
    Rejected,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Complete => "complete",
            FileStatus::Failed => "failed",
            FileStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "complete" => Some(FileStatus::Complete),
            "failed" => Some(FileStatus::Failed),
            "rejected" => Some(FileStatus::Rejected),
            _ => None,
        }
    }

    /// Terminal files are never re-processed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Complete | FileStatus::Failed | FileStatus::Rejected
        )
    }

    /// Terminal-and-done: skip without re-invoking any capability.
    pub fn is_settled(&self) -> bool {
        matches!(self, FileStatus::Complete | FileStatus::Rejected)
    }
}

impl Default for FileStatus {
    fn default() -> Self {
        FileStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    PendingSync,
    Complete,
    SyncFailed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::PendingSync => "pending_sync",
            CandidateStatus::Complete => "complete",
            CandidateStatus::SyncFailed => "sync_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_sync" => Some(CandidateStatus::PendingSync),
            "complete" => Some(CandidateStatus::Complete),
            "sync_failed" => Some(CandidateStatus::SyncFailed),
            _ => None,
        }
    }
}

/// Why a pack was routed to the hold queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    MissingCvFile,
    MissingContactInfo,
    DuplicateDetected,
    StudentExcluded,
    MissingRequiredSkills,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::MissingCvFile => "missing_cv_file",
            HoldReason::MissingContactInfo => "missing_contact_info",
            HoldReason::DuplicateDetected => "duplicate_detected",
            HoldReason::StudentExcluded => "student_excluded",
            HoldReason::MissingRequiredSkills => "missing_required_skills",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "missing_cv_file" => Some(HoldReason::MissingCvFile),
            "missing_contact_info" => Some(HoldReason::MissingContactInfo),
            "duplicate_detected" => Some(HoldReason::DuplicateDetected),
            "student_excluded" => Some(HoldReason::StudentExcluded),
            "missing_required_skills" => Some(HoldReason::MissingRequiredSkills),
            _ => None,
        }
    }
}

/// One intake event. Created externally before orchestration starts;
/// mutated only by the orchestrator.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: String,
    pub status: BatchStatus,
    pub file_count: u32,
    pub processed_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the current processing attempt claimed the batch.
    pub started_at: Option<DateTime<Utc>>,
    /// Recovery marker: set when a timed-out run is re-entered.
    pub recovered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    /// Fresh pending batch, as the upload intake would create it.
    pub fn new(id: impl Into<String>, file_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: BatchStatus::Pending,
            file_count,
            processed_count: 0,
            error: None,
            created_at: now,
            started_at: None,
            recovered_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Per-file status row, keyed by (batch_id, file_path).
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub batch_id: String,
    pub file_path: String,
    pub file_name: String,
    pub status: FileStatus,
    pub document_type: Option<DocumentType>,
    pub pack_id: Option<String>,
    pub candidate_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for one file. `None` metadata fields leave any
/// previously stored value in place (merge semantics); `error` always
/// overwrites so a later success clears an earlier message.
#[derive(Debug, Clone, Default)]
pub struct FilePatch {
    pub status: FileStatus,
    pub document_type: Option<DocumentType>,
    pub pack_id: Option<String>,
    pub candidate_id: Option<String>,
    pub error: Option<String>,
}

impl FilePatch {
    pub fn status(status: FileStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_error(status: FileStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Persisted candidate profile.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub id: String,
    pub batch_id: String,
    pub full_name: Option<String>,
    /// Normalized email, used for duplicate lookups.
    pub email: Option<String>,
    /// Normalized phone, used for duplicate lookups.
    pub phone: Option<String>,
    pub profile: CandidateProfile,
    /// Paths of every document in the pack.
    pub documents: Vec<String>,
    pub status: CandidateStatus,
    pub crm_contact_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable pack snapshot awaiting manual disposition. Never auto-resolved.
#[derive(Debug, Clone)]
pub struct HoldEntry {
    pub id: String,
    pub batch_id: String,
    pub pack_id: String,
    pub reason: HoldReason,
    pub identity: MergedIdentity,
    pub documents: Vec<DocumentMeta>,
    /// Bounded raw-text preview for the reviewer.
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

/// External operation classes metered by the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Extract,
    Classify,
    QuickParse,
    FullParse,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Extract => "extract",
            OperationKind::Classify => "classify",
            OperationKind::QuickParse => "quick_parse",
            OperationKind::FullParse => "full_parse",
        }
    }
}

/// Append-only ledger row; aggregated per UTC calendar day.
#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub day: NaiveDate,
    pub operation: OperationKind,
    pub call_count: u32,
    pub estimated_cost: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated usage for one UTC day.
#[derive(Debug, Clone, Copy)]
pub struct DailyUsage {
    pub day: NaiveDate,
    pub calls: u64,
    pub cost: f64,
}

impl DailyUsage {
    pub fn zero(day: NaiveDate) -> Self {
        Self {
            day,
            calls: 0,
            cost: 0.0,
        }
    }
}

/// Lookup by one contact channel.
#[derive(Debug, Clone, Copy)]
pub enum ContactQuery<'a> {
    Email(&'a str),
    Phone(&'a str),
}

pub trait BatchStore {
    fn find(&self, id: &str) -> Result<Option<BatchRecord>, GatewayError>;

    fn insert(&self, batch: &BatchRecord) -> Result<(), GatewayError>;

    /// Conditional claim: pending → processing. Returns false when the
    /// batch was not in `pending` (someone else claimed it, or it is
    /// terminal). This is the compare-and-set that closes the
    /// check-then-write race where the backing store supports it.
    fn claim_processing(&self, id: &str, now: DateTime<Utc>) -> Result<bool, GatewayError>;

    /// Marks a timed-out `processing` batch as recovered and restarts its
    /// clock. Returns false when the batch is no longer `processing`.
    fn mark_recovered(&self, id: &str, now: DateTime<Utc>) -> Result<bool, GatewayError>;

    /// Terminal bookkeeping for the run.
    fn finish(
        &self,
        id: &str,
        status: BatchStatus,
        processed_count: u32,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}

pub trait FileStatusStore {
    fn find(&self, batch_id: &str, file_path: &str) -> Result<Option<FileRecord>, GatewayError>;

    /// Merge-upsert on (batch_id, file_path): at most one logical row per
    /// file regardless of how many times a run is repeated.
    fn upsert(
        &self,
        batch_id: &str,
        file_path: &str,
        file_name: &str,
        patch: &FilePatch,
    ) -> Result<(), GatewayError>;

    fn list_for_batch(&self, batch_id: &str) -> Result<Vec<FileRecord>, GatewayError>;
}

pub trait CandidateStore {
    /// Most recently updated record matching the queried channel.
    fn find(&self, query: ContactQuery<'_>) -> Result<Option<CandidateRecord>, GatewayError>;

    fn insert(&self, record: &CandidateRecord) -> Result<(), GatewayError>;

    fn patch_status(
        &self,
        id: &str,
        status: CandidateStatus,
        crm_contact_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError>;
}

pub trait HoldQueueStore {
    fn insert(&self, entry: &HoldEntry) -> Result<(), GatewayError>;
}

pub trait UsageLedger {
    fn usage_for(&self, day: NaiveDate) -> Result<DailyUsage, GatewayError>;

    fn append(&self, entry: &UsageEntry) -> Result<(), GatewayError>;
}

/// The external relationship-management system.
pub trait Crm {
    /// Returns the matching contact id, if any.
    fn search(&self, query: ContactQuery<'_>) -> Result<Option<String>, GatewayError>;

    /// Creates a contact from already-mapped field ids and returns its id.
    fn create(&self, fields: &HashMap<String, String>) -> Result<String, GatewayError>;

    fn update(
        &self,
        contact_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<(), GatewayError>;

    /// Attaches a document to a contact; returns the stored file URL.
    fn upload_file(
        &self,
        contact_id: &str,
        bytes: &[u8],
        name: &str,
    ) -> Result<String, GatewayError>;

    /// Logical-field → external-field-id mapping. Cached by the sync
    /// adapter behind a short TTL.
    fn field_map(&self) -> Result<HashMap<String, String>, GatewayError>;
}
