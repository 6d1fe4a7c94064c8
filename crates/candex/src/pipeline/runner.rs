//! Batch orchestration state machine.
//!
//! Drives one intake batch through its phases: admission control,
//! per-file extraction and classification, pack grouping, per-pack
//! filtering / duplicate detection / parsing / persistence, and CRM
//! sync. All status bookkeeping is idempotent: repeated invocations skip
//! terminal batches and settled files without re-invoking any capability.

use chrono::Utc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::capability::{
    CandidateProfile, Classifier, DocumentType, QuickIdentity, StructuredParser, TextExtractor,
};
use crate::config::schema::IsolationPolicy;
use crate::cost::CostGuard;
use crate::dedupe::DuplicateDetector;
use crate::gateway::{
    BatchStatus, BatchStore, CandidateRecord, CandidateStatus, CandidateStore, Crm, FilePatch,
    FileStatus, FileStatusStore, HoldEntry, HoldQueueStore, HoldReason, OperationKind,
    UsageLedger,
};
use crate::identity::{normalize_email, normalize_phone, CandidatePack, ClassifiedFile, PackGrouper};
use crate::retry::RetryPolicy;
use crate::storage::{ObjectStore, StoredObject};
use crate::sync::{FieldMapCache, SyncAdapter};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::report::BatchReport;

/// Capability seams, grouped for construction.
pub struct Capabilities<'a> {
    pub extractor: &'a dyn TextExtractor,
    pub classifier: &'a dyn Classifier,
    pub parser: &'a dyn StructuredParser,
}

/// Persistence seams, grouped for construction. One backing object may
/// implement several of these (see `db::SqliteStores`).
pub struct Stores<'a> {
    pub batches: &'a dyn BatchStore,
    pub files: &'a dyn FileStatusStore,
    pub candidates: &'a dyn CandidateStore,
    pub hold_queue: &'a dyn HoldQueueStore,
    pub ledger: &'a dyn UsageLedger,
}

enum FileOutcome {
    Accepted(ClassifiedFile),
    Skipped,
    Rejected,
    Failed(String),
}

enum PackOutcome {
    Held,
    Candidate { synced: bool },
    Failed(String),
}

pub struct BatchOrchestrator<'a> {
    config: PipelineConfig,
    stores: Stores<'a>,
    capabilities: Capabilities<'a>,
    objects: &'a dyn ObjectStore,
    crm: &'a dyn Crm,
    retry: RetryPolicy,
    grouper: PackGrouper,
    sync: SyncAdapter<'a>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        config: PipelineConfig,
        stores: Stores<'a>,
        capabilities: Capabilities<'a>,
        objects: &'a dyn ObjectStore,
        crm: &'a dyn Crm,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        let grouper = PackGrouper::new(config.grouping.clone());
        let sync = SyncAdapter::new(
            crm,
            RetryPolicy::new(config.retry.clone()),
            FieldMapCache::new(config.sync.field_map_ttl_secs),
        );

        Self {
            config,
            stores,
            capabilities,
            objects,
            crm,
            retry,
            grouper,
            sync,
        }
    }

    /// Runs (or idempotently skips) one batch.
    pub fn run(&mut self, batch_id: &str) -> Result<BatchReport, PipelineError> {
        let _span = info_span!("batch", batch_id = %batch_id).entered();

        let batch = self
            .stores
            .batches
            .find(batch_id)?
            .ok_or_else(|| PipelineError::BatchNotFound(batch_id.to_string()))?;

        match batch.status {
            BatchStatus::Complete | BatchStatus::Failed | BatchStatus::AwaitingInput => {
                info!(status = batch.status.as_str(), "batch already settled, skipping");
                return Ok(BatchReport::skipped(&batch));
            }
            BatchStatus::Processing => {
                let allowance = self.config.timeouts.allowance_secs(batch.file_count);
                let started = batch.started_at.unwrap_or(batch.updated_at);
                let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
                if elapsed <= allowance {
                    info!(
                        elapsed_secs = elapsed,
                        allowance_secs = allowance,
                        "healthy run already in flight, skipping"
                    );
                    return Ok(BatchReport::skipped(&batch));
                }
                warn!(
                    elapsed_secs = elapsed,
                    allowance_secs = allowance,
                    "stale processing batch, entering recovery"
                );
                if !self.stores.batches.mark_recovered(batch_id, Utc::now())? {
                    // Status changed between read and write; defer to the
                    // run that won.
                    return Ok(BatchReport::skipped(&batch));
                }
            }
            BatchStatus::Pending => {
                if !self.stores.batches.claim_processing(batch_id, Utc::now())? {
                    debug!("lost the claim race, skipping");
                    return Ok(BatchReport::skipped(&batch));
                }
            }
        }

        // Admission control, before any file is read.
        let guard = CostGuard::new(self.config.cost.clone(), self.stores.ledger);
        let decision = guard.evaluate(batch.file_count);
        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "admission denied".to_string());
            warn!(%reason, "admission denied");
            self.stores
                .batches
                .finish(batch_id, BatchStatus::Failed, 0, Some(&reason), Utc::now())?;
            return Ok(BatchReport::denied(&batch, reason));
        }

        let mut report = BatchReport::new(batch_id, BatchStatus::Processing);
        let mut abort: Option<String> = None;

        // Phase 1: per-file extraction and classification.
        let objects = self.objects.list(batch_id)?;
        report.files_total = objects.len() as u32;

        let mut accepted: Vec<ClassifiedFile> = Vec::new();
        for obj in &objects {
            match self.process_file(&guard, batch_id, obj)? {
                FileOutcome::Accepted(file) => accepted.push(file),
                FileOutcome::Skipped => report.files_skipped += 1,
                FileOutcome::Rejected => report.files_rejected += 1,
                FileOutcome::Failed(message) => {
                    report.files_failed += 1;
                    if self.config.isolation == IsolationPolicy::FailFast {
                        abort = Some(format!("file '{}' failed: {}", obj.name, message));
                        break;
                    }
                }
            }
        }

        // Phases 2 and 3: grouping and per-pack resolution.
        if abort.is_none() {
            let grouping = self.grouper.group(accepted);
            report.packs_created = grouping.packs.len() as u32;

            for unmatched in &grouping.unmatched {
                self.stores.files.upsert(
                    batch_id,
                    &unmatched.file.file_path,
                    &unmatched.file.file_name,
                    &FilePatch {
                        status: FileStatus::Failed,
                        document_type: Some(unmatched.file.document_type),
                        error: Some(unmatched.reason.message().to_string()),
                        ..Default::default()
                    },
                )?;
                report.files_failed += 1;
            }

            for pack in &grouping.packs {
                for dropped in &pack.dropped {
                    self.stores.files.upsert(
                        batch_id,
                        &dropped.file_path,
                        &dropped.file_name,
                        &FilePatch {
                            status: FileStatus::Failed,
                            document_type: Some(dropped.document_type),
                            pack_id: Some(pack.pack_id.clone()),
                            error: Some("dropped by pack size bound".to_string()),
                            ..Default::default()
                        },
                    )?;
                    report.files_failed += 1;
                }

                match self.process_pack(&guard, batch_id, pack)? {
                    PackOutcome::Held => {
                        report.packs_held += 1;
                        report.files_rejected += pack.files.len() as u32;
                    }
                    PackOutcome::Candidate { synced } => {
                        report.candidates_created += 1;
                        report.files_completed += pack.files.len() as u32;
                        if synced {
                            report.candidates_synced += 1;
                        } else {
                            report.candidates_sync_failed += 1;
                        }
                    }
                    PackOutcome::Failed(message) => {
                        report.packs_failed += 1;
                        report.files_failed += pack.files.len() as u32;
                        if self.config.isolation == IsolationPolicy::FailFast {
                            abort = Some(message);
                            break;
                        }
                    }
                }
            }
        }

        // Phase 4: aggregate and settle the batch.
        let processed = self
            .stores
            .files
            .list_for_batch(batch_id)?
            .iter()
            .filter(|f| f.status.is_terminal())
            .count() as u32;

        let (status, error) = match abort {
            Some(message) => (BatchStatus::Failed, Some(message)),
            None if report.packs_held > 0 => (BatchStatus::AwaitingInput, None),
            None => (BatchStatus::Complete, None),
        };

        self.stores
            .batches
            .finish(batch_id, status, processed, error.as_deref(), Utc::now())?;

        report.status = status;
        report.processed_count = processed;
        report.error = error;

        info!(
            status = status.as_str(),
            files = report.files_total,
            completed = report.files_completed,
            rejected = report.files_rejected,
            failed = report.files_failed,
            held = report.packs_held,
            candidates = report.candidates_created,
            "batch finished"
        );

        Ok(report)
    }

    /// Phase 1 for one file. Business failures become terminal statuses
    /// and a `FileOutcome`; only store failures propagate as errors.
    fn process_file(
        &self,
        guard: &CostGuard<'_>,
        batch_id: &str,
        obj: &StoredObject,
    ) -> Result<FileOutcome, PipelineError> {
        let _span = info_span!("file", name = %obj.name).entered();

        if let Some(existing) = self.stores.files.find(batch_id, &obj.path)? {
            if existing.status.is_settled() {
                debug!(status = existing.status.as_str(), "file already settled, skipping");
                return Ok(FileOutcome::Skipped);
            }
        }

        self.stores.files.upsert(
            batch_id,
            &obj.path,
            &obj.name,
            &FilePatch::status(FileStatus::Processing),
        )?;

        let size = match self.objects.stat(&obj.path) {
            Ok(size) => size,
            Err(e) => return self.fail_file(batch_id, obj, format!("stat failed: {}", e)),
        };
        if size > self.config.limits.max_file_size_bytes {
            return self.reject_file(
                batch_id,
                obj,
                None,
                format!(
                    "file exceeds size limit ({} > {} bytes)",
                    size, self.config.limits.max_file_size_bytes
                ),
            );
        }

        let bytes = match self.objects.get(&obj.path) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail_file(batch_id, obj, format!("fetch failed: {}", e)),
        };

        let mime = mime_guess::from_path(&obj.name).first().map(|m| m.to_string());
        let text = match self.retry.run("extract_text", |_| {
            self.capabilities.extractor.extract(&bytes, mime.as_deref())
        }) {
            Ok(text) => {
                guard.record(OperationKind::Extract);
                text
            }
            Err(e) => return self.fail_file(batch_id, obj, e.to_string()),
        };

        if text.trim().chars().count() < self.config.limits.min_text_chars {
            return self.reject_file(
                batch_id,
                obj,
                None,
                format!(
                    "insufficient text extracted ({} chars, need {})",
                    text.trim().chars().count(),
                    self.config.limits.min_text_chars
                ),
            );
        }

        let verdict = match self.retry.run("classify", |_| {
            self.capabilities.classifier.classify(&text, &obj.name)
        }) {
            Ok(verdict) => {
                guard.record(OperationKind::Classify);
                verdict
            }
            Err(e) => return self.fail_file(batch_id, obj, e.to_string()),
        };

        if !verdict.should_process {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "classifier declined file".to_string());
            return self.reject_file(batch_id, obj, Some(verdict.document_type), reason);
        }

        let quick = match self.retry.run("quick_parse", |_| {
            self.capabilities.parser.quick_parse(&text)
        }) {
            Ok(quick) => {
                guard.record(OperationKind::QuickParse);
                quick
            }
            Err(e) if e.last_error().is_malformed() => {
                warn!(error = %e, "malformed quick-parse output, using empty identity");
                guard.record(OperationKind::QuickParse);
                QuickIdentity::default()
            }
            Err(e) => return self.fail_file(batch_id, obj, e.to_string()),
        };

        self.stores.files.upsert(
            batch_id,
            &obj.path,
            &obj.name,
            &FilePatch {
                status: FileStatus::Processing,
                document_type: Some(verdict.document_type),
                ..Default::default()
            },
        )?;

        Ok(FileOutcome::Accepted(ClassifiedFile {
            file_path: obj.path.clone(),
            file_name: obj.name.clone(),
            document_type: verdict.document_type,
            text,
            quick,
        }))
    }

    /// Phase 3 for one pack: filters, duplicate detection, full parsing,
    /// persistence, then sync.
    fn process_pack(
        &mut self,
        guard: &CostGuard<'_>,
        batch_id: &str,
        pack: &CandidatePack,
    ) -> Result<PackOutcome, PipelineError> {
        let _span = info_span!(
            "pack",
            pack_id = %pack.pack_id,
            key_kind = pack.identity_key.kind(),
            files = pack.files.len(),
        )
        .entered();

        if !pack.has_cv() {
            return self.hold_pack(
                batch_id,
                pack,
                HoldReason::MissingCvFile,
                "pack has no cv document",
            );
        }

        if self.config.filters.exclude_students && pack.merged.is_student {
            return self.hold_pack(
                batch_id,
                pack,
                HoldReason::StudentExcluded,
                "candidate flagged as student",
            );
        }

        let required = &self.config.filters.required_skills;
        if !required.is_empty() {
            let missing: Vec<&str> = required
                .iter()
                .filter(|r| {
                    !pack
                        .merged
                        .skills
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(r))
                })
                .map(String::as_str)
                .collect();
            if missing.len() == required.len() {
                let detail = format!("missing required skills: {}", missing.join(", "));
                return self.hold_pack(batch_id, pack, HoldReason::MissingRequiredSkills, &detail);
            }
        }

        if !pack.merged.has_contact() {
            return self.hold_pack(
                batch_id,
                pack,
                HoldReason::MissingContactInfo,
                "no email or phone found",
            );
        }

        let detector = DuplicateDetector::new(self.stores.candidates, self.crm, &self.retry);
        match detector.find_match(pack.merged.email.as_deref(), pack.merged.phone.as_deref()) {
            Ok(Some(found)) => {
                let detail = format!(
                    "matches existing profile {} in the {}",
                    found.reference, found.source
                );
                return self.hold_pack(batch_id, pack, HoldReason::DuplicateDetected, &detail);
            }
            Ok(None) => {}
            Err(e) => {
                return self.fail_pack(batch_id, pack, format!("duplicate lookup failed: {}", e))
            }
        }

        let profile = match self.retry.run("full_parse", |_| {
            self.capabilities.parser.full_parse(&pack.combined_text)
        }) {
            Ok(profile) => {
                guard.record(OperationKind::FullParse);
                profile
            }
            Err(e) if e.last_error().is_malformed() => {
                warn!(error = %e, "malformed full-parse output, substituting empty profile");
                guard.record(OperationKind::FullParse);
                CandidateProfile::default()
            }
            Err(e) => return self.fail_pack(batch_id, pack, e.to_string()),
        };

        // Contact columns prefer the parsed profile, backfilled from the
        // merged quick identity so a defaulted profile still carries the
        // channels that grouped the pack.
        let now = Utc::now();
        let candidate = CandidateRecord {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            full_name: profile
                .full_name
                .clone()
                .or_else(|| pack.merged.full_name.clone()),
            email: profile
                .email
                .as_deref()
                .and_then(normalize_email)
                .or_else(|| pack.merged.email.clone()),
            phone: profile
                .phone
                .as_deref()
                .and_then(normalize_phone)
                .or_else(|| pack.merged.phone.clone()),
            profile,
            documents: pack.documents.iter().map(|d| d.file_path.clone()).collect(),
            status: CandidateStatus::PendingSync,
            crm_contact_id: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.stores.candidates.insert(&candidate) {
            return self.fail_pack(batch_id, pack, format!("candidate persist failed: {}", e));
        }

        for file in &pack.files {
            self.stores.files.upsert(
                batch_id,
                &file.file_path,
                &file.file_name,
                &FilePatch {
                    status: FileStatus::Complete,
                    document_type: Some(file.document_type),
                    pack_id: Some(pack.pack_id.clone()),
                    candidate_id: Some(candidate.id.clone()),
                    error: None,
                },
            )?;
        }

        // Mirror to the CRM. The source-of-truth write already succeeded,
        // so any failure from here degrades the candidate instead of
        // failing the pack.
        let mut attachments = Vec::with_capacity(pack.documents.len());
        let mut fetch_error: Option<String> = None;
        for doc in &pack.documents {
            match self.objects.get(&doc.file_path) {
                Ok(bytes) => attachments.push((doc.file_name.clone(), bytes)),
                Err(e) => {
                    fetch_error = Some(format!("attachment '{}': {}", doc.file_name, e));
                    break;
                }
            }
        }

        let synced = match fetch_error {
            Some(message) => {
                warn!(%message, "attachment fetch failed, degrading candidate");
                self.stores.candidates.patch_status(
                    &candidate.id,
                    CandidateStatus::SyncFailed,
                    None,
                    Utc::now(),
                )?;
                false
            }
            None => match self.sync.sync_candidate(&candidate, &attachments) {
                Ok(outcome) => {
                    self.stores.candidates.patch_status(
                        &candidate.id,
                        CandidateStatus::Complete,
                        Some(&outcome.contact_id),
                        Utc::now(),
                    )?;
                    debug!(contact_id = %outcome.contact_id, "candidate mirrored to CRM");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "sync failed, candidate kept as sync_failed");
                    self.stores.candidates.patch_status(
                        &candidate.id,
                        CandidateStatus::SyncFailed,
                        None,
                        Utc::now(),
                    )?;
                    false
                }
            },
        };

        Ok(PackOutcome::Candidate { synced })
    }

    /// Routes a pack to the hold queue and records a terminal rejected
    /// status (with a readable reason) on each of its files.
    fn hold_pack(
        &self,
        batch_id: &str,
        pack: &CandidatePack,
        reason: HoldReason,
        detail: &str,
    ) -> Result<PackOutcome, PipelineError> {
        let preview: String = pack
            .combined_text
            .chars()
            .take(self.config.limits.hold_preview_chars)
            .collect();

        self.stores.hold_queue.insert(&HoldEntry {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            pack_id: pack.pack_id.clone(),
            reason,
            identity: pack.merged.clone(),
            documents: pack.documents.clone(),
            preview,
            created_at: Utc::now(),
        })?;

        let message = format!("routed to hold queue ({}): {}", reason.as_str(), detail);
        for file in &pack.files {
            self.stores.files.upsert(
                batch_id,
                &file.file_path,
                &file.file_name,
                &FilePatch {
                    status: FileStatus::Rejected,
                    document_type: Some(file.document_type),
                    pack_id: Some(pack.pack_id.clone()),
                    error: Some(message.clone()),
                    ..Default::default()
                },
            )?;
        }

        info!(reason = reason.as_str(), detail, "pack routed to hold queue");
        Ok(PackOutcome::Held)
    }

    /// Marks every file of a failed pack as terminal.
    fn fail_pack(
        &self,
        batch_id: &str,
        pack: &CandidatePack,
        message: String,
    ) -> Result<PackOutcome, PipelineError> {
        warn!(%message, "pack failed");
        for file in &pack.files {
            self.stores.files.upsert(
                batch_id,
                &file.file_path,
                &file.file_name,
                &FilePatch {
                    status: FileStatus::Failed,
                    document_type: Some(file.document_type),
                    pack_id: Some(pack.pack_id.clone()),
                    error: Some(message.clone()),
                    ..Default::default()
                },
            )?;
        }
        Ok(PackOutcome::Failed(message))
    }

    fn fail_file(
        &self,
        batch_id: &str,
        obj: &StoredObject,
        message: String,
    ) -> Result<FileOutcome, PipelineError> {
        warn!(name = %obj.name, %message, "file failed");
        self.stores.files.upsert(
            batch_id,
            &obj.path,
            &obj.name,
            &FilePatch::with_error(FileStatus::Failed, message.clone()),
        )?;
        Ok(FileOutcome::Failed(message))
    }

    fn reject_file(
        &self,
        batch_id: &str,
        obj: &StoredObject,
        document_type: Option<DocumentType>,
        reason: String,
    ) -> Result<FileOutcome, PipelineError> {
        debug!(name = %obj.name, %reason, "file rejected");
        self.stores.files.upsert(
            batch_id,
            &obj.path,
            &obj.name,
            &FilePatch {
                status: FileStatus::Rejected,
                document_type,
                error: Some(reason),
                ..Default::default()
            },
        )?;
        Ok(FileOutcome::Rejected)
    }
}
