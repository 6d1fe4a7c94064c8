//! Trait seams for the extraction / classification / parsing capability.
//!
//! The intelligence behind these calls (OCR, models, prompt design) lives
//! outside this crate; the orchestrator only depends on the three traits
//! below plus their data types. Implementations are expected to be
//! blocking request/response calls — the orchestrator wraps each one in
//! the bounded retry loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{ExternalError, RetryHint};

/// Document kind assigned by classification.
///
/// The variant order matters indirectly: packs concatenate text cv-first,
/// see [`DocumentType::precedence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Cv,
    CoverLetter,
    Application,
    SupportingDocument,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Cv => "cv",
            DocumentType::CoverLetter => "cover_letter",
            DocumentType::Application => "application",
            DocumentType::SupportingDocument => "supporting_document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cv" => Some(DocumentType::Cv),
            "cover_letter" => Some(DocumentType::CoverLetter),
            "application" => Some(DocumentType::Application),
            "supporting_document" => Some(DocumentType::SupportingDocument),
            _ => None,
        }
    }

    /// Sort rank inside a pack: cv first, then cover letter, then
    /// application, then everything else.
    pub fn precedence(&self) -> u8 {
        match self {
            DocumentType::Cv => 0,
            DocumentType::CoverLetter => 1,
            DocumentType::Application => 2,
            DocumentType::SupportingDocument => 3,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict returned by the classifier for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub document_type: DocumentType,
    pub confidence: f32,
    /// False means "do not process" — the file is rejected with `reason`.
    pub should_process: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Cheap partial identity used only for grouping and filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickIdentity {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub is_student: bool,
}

impl QuickIdentity {
    /// True when no grouping signal is present at all.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none() && self.full_name.is_none()
    }
}

/// Full structured profile produced once per resolved pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperienceEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EducationEntry {
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub qualification: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
}

/// Errors crossing the capability boundary.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("text extraction failed: {message}")]
    Extraction {
        message: String,
        status: Option<u16>,
    },

    #[error("classification failed: {message}")]
    Classification {
        message: String,
        status: Option<u16>,
    },

    #[error("structured parsing failed: {message}")]
    Parsing {
        message: String,
        status: Option<u16>,
    },

    /// The capability answered, but the payload did not have the expected
    /// shape. Recovered locally with a safe default, never retried.
    #[error("malformed structured output: {0}")]
    MalformedResponse(String),
}

impl CapabilityError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, CapabilityError::MalformedResponse(_))
    }
}

impl ExternalError for CapabilityError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            CapabilityError::MalformedResponse(_) => RetryHint::Fatal,
            CapabilityError::Extraction { status, .. }
            | CapabilityError::Classification { status, .. }
            | CapabilityError::Parsing { status, .. } => match status {
                Some(code) => RetryHint::Status(*code),
                None => RetryHint::Transport,
            },
        }
    }
}

/// Raw bytes to text.
pub trait TextExtractor {
    fn extract(&self, bytes: &[u8], mime_hint: Option<&str>) -> Result<String, CapabilityError>;
}

/// Text to a document-type verdict.
pub trait Classifier {
    fn classify(&self, text: &str, file_name: &str)
        -> Result<ClassificationVerdict, CapabilityError>;
}

/// Text to partial or full structured fields.
pub trait StructuredParser {
    /// Cheap identity/skill extraction used only for grouping and filters.
    fn quick_parse(&self, text: &str) -> Result<QuickIdentity, CapabilityError>;

    /// Complete structured-field extraction, run once per resolved pack.
    fn full_parse(&self, text: &str) -> Result<CandidateProfile, CapabilityError>;
}
