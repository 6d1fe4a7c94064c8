//! Two-pass greedy grouping of classified files into candidate packs.
//!
//! Pass one groups on strong keys (normalized email, then phone). Files
//! whose only signal is a name are reconciled in a second pass against
//! name-keyed packs; files with no signal at all surface as unmatched and
//! are never attached to an unrelated pack.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::capability::{DocumentType, QuickIdentity};
use crate::config::schema::GroupingConfig;

use super::normalize::{normalize_email, normalize_name, normalize_phone};

/// Canonical grouping key. Unique within one grouping run; never
/// persisted across batches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Email(String),
    Phone(String),
    Name(String),
}

impl IdentityKey {
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityKey::Email(_) => "email",
            IdentityKey::Phone(_) => "phone",
            IdentityKey::Name(_) => "name",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            IdentityKey::Email(v) | IdentityKey::Phone(v) | IdentityKey::Name(v) => v,
        }
    }
}

/// A file that survived phase one: extracted text plus its verdict and
/// quick identity.
#[derive(Debug, Clone)]
pub struct ClassifiedFile {
    pub file_path: String,
    pub file_name: String,
    pub document_type: DocumentType,
    pub text: String,
    pub quick: QuickIdentity,
}

/// Identity fields merged across a pack: first-non-null wins, skills are
/// unioned, the student flag is sticky.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedIdentity {
    /// Normalized email.
    pub email: Option<String>,
    /// Normalized (digits-only) phone.
    pub phone: Option<String>,
    /// First reported display name, as extracted.
    pub full_name: Option<String>,
    pub skills: Vec<String>,
    pub is_student: bool,
}

impl MergedIdentity {
    pub fn has_contact(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }
}

/// Per-file metadata carried on packs, candidates and hold entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub file_path: String,
    pub file_name: String,
    pub document_type: DocumentType,
}

/// One resolved candidate's documents.
#[derive(Debug, Clone)]
pub struct CandidatePack {
    pub pack_id: String,
    pub identity_key: IdentityKey,
    pub files: Vec<ClassifiedFile>,
    pub merged: MergedIdentity,
    pub documents: Vec<DocumentMeta>,
    pub combined_text: String,
    /// Files dropped by the max-files-per-pack bound, in drop order.
    pub dropped: Vec<DocumentMeta>,
}

impl CandidatePack {
    pub fn has_cv(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.document_type == DocumentType::Cv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    /// No email, phone or name anywhere in the file.
    NoIdentitySignal,
    /// Name-only signal, no matching pack, singleton packs disallowed.
    NameOnlyNoMatch,
}

impl UnmatchedReason {
    pub fn message(&self) -> &'static str {
        match self {
            UnmatchedReason::NoIdentitySignal => "insufficient identity",
            UnmatchedReason::NameOnlyNoMatch => {
                "no matching candidate for name-only document"
            }
        }
    }
}

/// A file the grouper could not place. The orchestrator records a
/// terminal status for each of these.
#[derive(Debug)]
pub struct UnmatchedFile {
    pub file: ClassifiedFile,
    pub reason: UnmatchedReason,
}

#[derive(Debug)]
pub struct GroupingOutcome {
    pub packs: Vec<CandidatePack>,
    pub unmatched: Vec<UnmatchedFile>,
}

enum FileSignal {
    Strong(IdentityKey),
    NameOnly(String),
    None,
}

/// Priority key per file: email beats phone beats name.
fn file_signal(quick: &QuickIdentity) -> FileSignal {
    if let Some(email) = quick.email.as_deref().and_then(normalize_email) {
        return FileSignal::Strong(IdentityKey::Email(email));
    }
    if let Some(phone) = quick.phone.as_deref().and_then(normalize_phone) {
        return FileSignal::Strong(IdentityKey::Phone(phone));
    }
    if let Some(name) = quick.full_name.as_deref().and_then(normalize_name) {
        return FileSignal::NameOnly(name);
    }
    FileSignal::None
}

struct PackBuilder {
    key: IdentityKey,
    files: Vec<ClassifiedFile>,
}

pub struct PackGrouper {
    config: GroupingConfig,
}

impl PackGrouper {
    pub fn new(config: GroupingConfig) -> Self {
        Self { config }
    }

    /// Partitions `files` into disjoint packs plus unmatched leftovers.
    pub fn group(&self, files: Vec<ClassifiedFile>) -> GroupingOutcome {
        let mut builders: Vec<PackBuilder> = Vec::new();
        let mut index: HashMap<IdentityKey, usize> = HashMap::new();
        let mut name_orphans: Vec<(String, ClassifiedFile)> = Vec::new();
        let mut unmatched: Vec<UnmatchedFile> = Vec::new();

        // Strong-key pass.
        for file in files {
            match file_signal(&file.quick) {
                FileSignal::Strong(key) => {
                    Self::join(&mut builders, &mut index, key, file);
                }
                FileSignal::NameOnly(name) => name_orphans.push((name, file)),
                FileSignal::None => unmatched.push(UnmatchedFile {
                    file,
                    reason: UnmatchedReason::NoIdentitySignal,
                }),
            }
        }

        // Orphan reconciliation pass. Name-keyed packs only ever arise
        // here, so earlier orphans can anchor later ones.
        for (name, file) in name_orphans {
            let key = IdentityKey::Name(name);
            if let Some(&slot) = index.get(&key) {
                builders[slot].files.push(file);
            } else if self.config.allow_singleton_packs {
                Self::join(&mut builders, &mut index, key, file);
            } else {
                unmatched.push(UnmatchedFile {
                    file,
                    reason: UnmatchedReason::NameOnlyNoMatch,
                });
            }
        }

        let packs = builders
            .into_iter()
            .map(|b| self.finish(b))
            .collect();

        GroupingOutcome { packs, unmatched }
    }

    fn join(
        builders: &mut Vec<PackBuilder>,
        index: &mut HashMap<IdentityKey, usize>,
        key: IdentityKey,
        file: ClassifiedFile,
    ) {
        if let Some(&slot) = index.get(&key) {
            builders[slot].files.push(file);
        } else {
            index.insert(key.clone(), builders.len());
            builders.push(PackBuilder {
                key,
                files: vec![file],
            });
        }
    }

    fn finish(&self, builder: PackBuilder) -> CandidatePack {
        // Merge identity in join order, before any reordering.
        let mut merged = MergedIdentity::default();
        for file in &builder.files {
            let quick = &file.quick;
            if merged.email.is_none() {
                merged.email = quick.email.as_deref().and_then(normalize_email);
            }
            if merged.phone.is_none() {
                merged.phone = quick.phone.as_deref().and_then(normalize_phone);
            }
            if merged.full_name.is_none() {
                merged.full_name = quick
                    .full_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from);
            }
            merged.is_student |= quick.is_student;
            for skill in &quick.skills {
                let trimmed = skill.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let already = merged
                    .skills
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(trimmed));
                if !already {
                    merged.skills.push(trimmed.to_string());
                }
            }
        }

        // Fixed document-type precedence: cv, cover letter, application,
        // then the rest. Downstream parsing anchors on a cv-first window.
        let mut files = builder.files;
        files.sort_by_key(|f| f.document_type.precedence());

        let max = self.config.max_files_per_pack.max(1);
        let dropped: Vec<DocumentMeta> = if files.len() > max {
            let excess = files.split_off(max);
            warn!(
                key = %builder.key.value(),
                kept = files.len(),
                dropped = excess.len(),
                "pack exceeds max_files_per_pack, dropping excess files"
            );
            excess.iter().map(document_meta).collect()
        } else {
            Vec::new()
        };

        let documents: Vec<DocumentMeta> = files.iter().map(document_meta).collect();

        let mut combined_text = String::new();
        for file in &files {
            combined_text.push_str(&format!(
                "===== {} [{}] =====\n",
                file.file_name, file.document_type
            ));
            combined_text.push_str(&file.text);
            combined_text.push_str("\n\n");
        }

        CandidatePack {
            pack_id: Uuid::new_v4().to_string(),
            identity_key: builder.key,
            files,
            merged,
            documents,
            combined_text,
            dropped,
        }
    }
}

fn document_meta(file: &ClassifiedFile) -> DocumentMeta {
    DocumentMeta {
        file_path: file.file_path.clone(),
        file_name: file.file_name.clone(),
        document_type: file.document_type,
    }
}
