//! Shared test harness: scripted capability fakes, a fake CRM, and an
//! isolated environment (tempdir object store + in-memory SQLite) for
//! driving the orchestrator end to end.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use chrono::Utc;
use tempfile::TempDir;

use candex::capability::{
    CandidateProfile, CapabilityError, ClassificationVerdict, Classifier, DocumentType,
    QuickIdentity, StructuredParser, TextExtractor,
};
use candex::config::schema::LimitsConfig;
use candex::db::{hold_repo, Database, SqliteStores};
use candex::gateway::{
    BatchRecord, BatchStore, CandidateRecord, CandidateStore, ContactQuery, Crm, FileRecord,
    FileStatusStore, GatewayError, HoldEntry,
};
use candex::pipeline::{BatchOrchestrator, BatchReport, Capabilities, PipelineConfig, Stores};
use candex::retry::RetryConfig;
use candex::storage::local::write_object;
use candex::storage::LocalObjectStore;

/// Extractor that decodes bytes as UTF-8. Content containing
/// `EXTRACT_FAIL` simulates a persistently unavailable backend.
#[derive(Default)]
pub struct FakeExtractor {
    pub calls: Cell<u32>,
}

impl TextExtractor for FakeExtractor {
    fn extract(&self, bytes: &[u8], _mime_hint: Option<&str>) -> Result<String, CapabilityError> {
        self.calls.set(self.calls.get() + 1);
        let text = String::from_utf8_lossy(bytes).to_string();
        if text.contains("EXTRACT_FAIL") {
            return Err(CapabilityError::Extraction {
                message: "backend unavailable".to_string(),
                status: Some(503),
            });
        }
        Ok(text)
    }
}

/// Classifier keyed on the file name; content containing
/// `CLASSIFY_REJECT` yields a do-not-process verdict.
#[derive(Default)]
pub struct FakeClassifier {
    pub calls: Cell<u32>,
}

impl Classifier for FakeClassifier {
    fn classify(
        &self,
        text: &str,
        file_name: &str,
    ) -> Result<ClassificationVerdict, CapabilityError> {
        self.calls.set(self.calls.get() + 1);

        if text.contains("CLASSIFY_REJECT") {
            return Ok(ClassificationVerdict {
                document_type: DocumentType::SupportingDocument,
                confidence: 0.2,
                should_process: false,
                reason: Some("not a candidate document".to_string()),
            });
        }

        let document_type = if file_name.contains("cv") {
            DocumentType::Cv
        } else if file_name.contains("letter") {
            DocumentType::CoverLetter
        } else if file_name.contains("form") || file_name.contains("application") {
            DocumentType::Application
        } else {
            DocumentType::SupportingDocument
        };

        Ok(ClassificationVerdict {
            document_type,
            confidence: 0.9,
            should_process: true,
            reason: None,
        })
    }
}

/// Parser over a simple `key: value` line format. `MALFORMED_QUICK` /
/// `MALFORMED_FULL` markers simulate unparseable model output.
#[derive(Default)]
pub struct FakeParser {
    pub quick_calls: Cell<u32>,
    pub full_calls: Cell<u32>,
}

fn scan_fields(text: &str) -> QuickIdentity {
    let mut quick = QuickIdentity::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("email:") {
            quick.email = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("phone:") {
            quick.phone = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("name:") {
            quick.full_name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("skills:") {
            quick.skills = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        } else if let Some(value) = line.strip_prefix("student:") {
            quick.is_student = value.trim() == "yes";
        }
    }
    quick
}

impl StructuredParser for FakeParser {
    fn quick_parse(&self, text: &str) -> Result<QuickIdentity, CapabilityError> {
        self.quick_calls.set(self.quick_calls.get() + 1);
        if text.contains("MALFORMED_QUICK") {
            return Err(CapabilityError::MalformedResponse(
                "quick output was not JSON".to_string(),
            ));
        }
        Ok(scan_fields(text))
    }

    fn full_parse(&self, text: &str) -> Result<CandidateProfile, CapabilityError> {
        self.full_calls.set(self.full_calls.get() + 1);
        if text.contains("MALFORMED_FULL") {
            return Err(CapabilityError::MalformedResponse(
                "full output was not JSON".to_string(),
            ));
        }
        let quick = scan_fields(text);
        Ok(CandidateProfile {
            full_name: quick.full_name,
            email: quick.email,
            phone: quick.phone,
            summary: Some("parsed by fake".to_string()),
            skills: quick.skills,
            ..Default::default()
        })
    }
}

/// Scripted relationship system.
#[derive(Default)]
pub struct FakeCrm {
    pub email_hit: RefCell<Option<String>>,
    pub phone_hit: RefCell<Option<String>>,
    pub fail_create: Cell<bool>,
    pub searches: Cell<u32>,
    pub field_map_calls: Cell<u32>,
    pub created: RefCell<Vec<HashMap<String, String>>>,
    pub uploads: RefCell<Vec<(String, String)>>,
}

impl Crm for FakeCrm {
    fn search(&self, query: ContactQuery<'_>) -> Result<Option<String>, GatewayError> {
        self.searches.set(self.searches.get() + 1);
        Ok(match query {
            ContactQuery::Email(_) => self.email_hit.borrow().clone(),
            ContactQuery::Phone(_) => self.phone_hit.borrow().clone(),
        })
    }

    fn create(&self, fields: &HashMap<String, String>) -> Result<String, GatewayError> {
        if self.fail_create.get() {
            return Err(GatewayError::Http {
                status: 500,
                message: "contact create refused".to_string(),
            });
        }
        let mut created = self.created.borrow_mut();
        created.push(fields.clone());
        Ok(format!("contact-{}", created.len()))
    }

    fn update(
        &self,
        _contact_id: &str,
        _fields: &HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    fn upload_file(
        &self,
        contact_id: &str,
        _bytes: &[u8],
        name: &str,
    ) -> Result<String, GatewayError> {
        self.uploads
            .borrow_mut()
            .push((contact_id.to_string(), name.to_string()));
        Ok(format!("https://crm.example/files/{}", name))
    }

    fn field_map(&self) -> Result<HashMap<String, String>, GatewayError> {
        self.field_map_calls.set(self.field_map_calls.get() + 1);
        Ok(HashMap::new())
    }
}

/// Fast retries and lenient text limits for tests.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ms: 0,
            ..Default::default()
        },
        limits: LimitsConfig {
            max_file_size_bytes: 1024 * 1024,
            min_text_chars: 10,
            hold_preview_chars: 200,
        },
        ..Default::default()
    }
}

/// Isolated environment for one test.
pub struct Harness {
    tmp: TempDir,
    pub stores: SqliteStores,
    pub objects: LocalObjectStore,
    pub extractor: FakeExtractor,
    pub classifier: FakeClassifier,
    pub parser: FakeParser,
    pub crm: FakeCrm,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let objects = LocalObjectStore::new(tmp.path());
        let stores = SqliteStores::new(Database::open_in_memory().expect("in-memory db"));
        Self {
            tmp,
            stores,
            objects,
            extractor: FakeExtractor::default(),
            classifier: FakeClassifier::default(),
            parser: FakeParser::default(),
            crm: FakeCrm::default(),
            config,
        }
    }

    /// Creates the batch record the way the upload intake would.
    pub fn seed_batch(&self, id: &str, file_count: u32) {
        BatchStore::insert(&self.stores, &BatchRecord::new(id, file_count, Utc::now()))
            .expect("seed batch");
    }

    pub fn seed_batch_record(&self, record: &BatchRecord) {
        BatchStore::insert(&self.stores, record).expect("seed batch record");
    }

    /// Writes one uploaded document under `batch_id/`.
    pub fn write_file(&self, batch_id: &str, name: &str, content: &str) {
        write_object(
            self.tmp.path(),
            &format!("{}/{}", batch_id, name),
            content.as_bytes(),
        )
        .expect("write object");
    }

    pub fn run(&self, batch_id: &str) -> BatchReport {
        let stores = Stores {
            batches: &self.stores,
            files: &self.stores,
            candidates: &self.stores,
            hold_queue: &self.stores,
            ledger: &self.stores,
        };
        let capabilities = Capabilities {
            extractor: &self.extractor,
            classifier: &self.classifier,
            parser: &self.parser,
        };
        let mut orchestrator = BatchOrchestrator::new(
            self.config.clone(),
            stores,
            capabilities,
            &self.objects,
            &self.crm,
        );
        orchestrator.run(batch_id).expect("orchestrator run")
    }

    /// Total capability calls made so far (extraction + classification +
    /// parsing).
    pub fn capability_calls(&self) -> u32 {
        self.extractor.calls.get()
            + self.classifier.calls.get()
            + self.parser.quick_calls.get()
            + self.parser.full_calls.get()
    }

    pub fn batch(&self, id: &str) -> BatchRecord {
        BatchStore::find(&self.stores, id)
            .expect("batch lookup")
            .expect("batch exists")
    }

    pub fn files(&self, batch_id: &str) -> Vec<FileRecord> {
        FileStatusStore::list_for_batch(&self.stores, batch_id).expect("file listing")
    }

    pub fn file(&self, batch_id: &str, name: &str) -> FileRecord {
        FileStatusStore::find(&self.stores, batch_id, &format!("{}/{}", batch_id, name))
            .expect("file lookup")
            .expect("file exists")
    }

    pub fn holds(&self, batch_id: &str) -> Vec<HoldEntry> {
        hold_repo::list_for_batch(self.stores.database(), batch_id).expect("hold listing")
    }

    pub fn candidate_by_email(&self, email: &str) -> Option<CandidateRecord> {
        CandidateStore::find(&self.stores, ContactQuery::Email(email)).expect("candidate lookup")
    }
}

/// Minimal cv-shaped content carrying an email signal.
pub fn cv_content(email: &str) -> String {
    format!(
        "email: {}\nname: Jane Doe\nskills: rust, sql\nSeasoned engineer with years of relevant delivery experience.\n",
        email
    )
}

/// Cover-letter-shaped content carrying an email signal.
pub fn letter_content(email: &str) -> String {
    format!(
        "email: {}\nDear hiring team, I am writing to express my interest in the role.\n",
        email
    )
}
