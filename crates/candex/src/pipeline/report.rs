use crate::gateway::{BatchRecord, BatchStatus};

/// Outcome summary of one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    /// True when the invocation was an idempotent no-op (batch already
    /// terminal, or a healthy run is still in flight).
    pub skipped: bool,
    pub files_total: u32,
    pub files_skipped: u32,
    pub files_completed: u32,
    pub files_rejected: u32,
    pub files_failed: u32,
    pub packs_created: u32,
    pub packs_held: u32,
    pub packs_failed: u32,
    pub candidates_created: u32,
    pub candidates_synced: u32,
    pub candidates_sync_failed: u32,
    pub processed_count: u32,
    pub error: Option<String>,
}

impl BatchReport {
    pub fn new(batch_id: impl Into<String>, status: BatchStatus) -> Self {
        Self {
            batch_id: batch_id.into(),
            status,
            skipped: false,
            files_total: 0,
            files_skipped: 0,
            files_completed: 0,
            files_rejected: 0,
            files_failed: 0,
            packs_created: 0,
            packs_held: 0,
            packs_failed: 0,
            candidates_created: 0,
            candidates_synced: 0,
            candidates_sync_failed: 0,
            processed_count: 0,
            error: None,
        }
    }

    /// Idempotent no-op result covering the batch's full file count.
    pub fn skipped(batch: &BatchRecord) -> Self {
        let mut report = Self::new(batch.id.clone(), batch.status);
        report.skipped = true;
        report.files_total = batch.file_count;
        report.files_skipped = batch.file_count;
        report.processed_count = batch.processed_count;
        report
    }

    /// Admission-denied result: the batch failed before any file was read.
    pub fn denied(batch: &BatchRecord, reason: String) -> Self {
        let mut report = Self::new(batch.id.clone(), BatchStatus::Failed);
        report.files_total = batch.file_count;
        report.error = Some(reason);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_skipped_report_covers_full_file_count() {
        let mut batch = BatchRecord::new("b1", 7, Utc::now());
        batch.status = BatchStatus::Complete;
        batch.processed_count = 7;

        let report = BatchReport::skipped(&batch);
        assert!(report.skipped);
        assert_eq!(report.files_total, 7);
        assert_eq!(report.files_skipped, 7);
        assert_eq!(report.status, BatchStatus::Complete);
    }

    #[test]
    fn test_denied_report_reads_zero_files() {
        let batch = BatchRecord::new("b1", 1000, Utc::now());
        let report = BatchReport::denied(&batch, "over budget".to_string());
        assert_eq!(report.status, BatchStatus::Failed);
        assert_eq!(report.files_total, 1000);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(report.files_completed, 0);
        assert_eq!(report.error.as_deref(), Some("over budget"));
    }
}
