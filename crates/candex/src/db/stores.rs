//! SQLite-backed implementations of the persistence-gateway traits.
//!
//! One cheaply clonable handle implements every store trait; hosts pass
//! the same value wherever the orchestrator expects a store.

use chrono::{DateTime, NaiveDate, Utc};

use crate::gateway::{
    BatchRecord, BatchStatus, BatchStore, CandidateRecord, CandidateStatus, CandidateStore,
    ContactQuery, DailyUsage, FilePatch, FileRecord, FileStatusStore, GatewayError, HoldEntry,
    HoldQueueStore, UsageEntry, UsageLedger,
};

use super::{batch_repo, candidate_repo, file_repo, hold_repo, usage_repo, Database, DatabaseError};

fn backend(e: DatabaseError) -> GatewayError {
    GatewayError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct SqliteStores {
    db: Database,
}

impl SqliteStores {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl BatchStore for SqliteStores {
    fn find(&self, id: &str) -> Result<Option<BatchRecord>, GatewayError> {
        batch_repo::find_by_id(&self.db, id).map_err(backend)
    }

    fn insert(&self, batch: &BatchRecord) -> Result<(), GatewayError> {
        batch_repo::insert(&self.db, batch).map_err(backend)
    }

    fn claim_processing(&self, id: &str, now: DateTime<Utc>) -> Result<bool, GatewayError> {
        batch_repo::claim_processing(&self.db, id, now).map_err(backend)
    }

    fn mark_recovered(&self, id: &str, now: DateTime<Utc>) -> Result<bool, GatewayError> {
        batch_repo::mark_recovered(&self.db, id, now).map_err(backend)
    }

    fn finish(
        &self,
        id: &str,
        status: BatchStatus,
        processed_count: u32,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        batch_repo::finish(&self.db, id, status, processed_count, error, now).map_err(backend)
    }
}

impl FileStatusStore for SqliteStores {
    fn find(&self, batch_id: &str, file_path: &str) -> Result<Option<FileRecord>, GatewayError> {
        file_repo::find(&self.db, batch_id, file_path).map_err(backend)
    }

    fn upsert(
        &self,
        batch_id: &str,
        file_path: &str,
        file_name: &str,
        patch: &FilePatch,
    ) -> Result<(), GatewayError> {
        file_repo::upsert(&self.db, batch_id, file_path, file_name, patch, Utc::now())
            .map_err(backend)
    }

    fn list_for_batch(&self, batch_id: &str) -> Result<Vec<FileRecord>, GatewayError> {
        file_repo::list_for_batch(&self.db, batch_id).map_err(backend)
    }
}

impl CandidateStore for SqliteStores {
    fn find(&self, query: ContactQuery<'_>) -> Result<Option<CandidateRecord>, GatewayError> {
        match query {
            ContactQuery::Email(email) => {
                candidate_repo::find_by_email(&self.db, email).map_err(backend)
            }
            ContactQuery::Phone(phone) => {
                candidate_repo::find_by_phone(&self.db, phone).map_err(backend)
            }
        }
    }

    fn insert(&self, record: &CandidateRecord) -> Result<(), GatewayError> {
        candidate_repo::insert(&self.db, record).map_err(backend)
    }

    fn patch_status(
        &self,
        id: &str,
        status: CandidateStatus,
        crm_contact_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        candidate_repo::patch_status(&self.db, id, status, crm_contact_id, now).map_err(backend)
    }
}

impl HoldQueueStore for SqliteStores {
    fn insert(&self, entry: &HoldEntry) -> Result<(), GatewayError> {
        hold_repo::insert(&self.db, entry).map_err(backend)
    }
}

impl UsageLedger for SqliteStores {
    fn usage_for(&self, day: NaiveDate) -> Result<DailyUsage, GatewayError> {
        usage_repo::usage_for_day(&self.db, day).map_err(backend)
    }

    fn append(&self, entry: &UsageEntry) -> Result<(), GatewayError> {
        usage_repo::append(&self.db, entry).map_err(backend)
    }
}
