//! Mirroring persisted candidates into the relationship-management
//! system.
//!
//! The adapter owns an explicit `{data, expiry}` field-map cache injected
//! at construction time — no ambient singleton. A sync failure is a
//! degradation, not a batch failure: the orchestrator downgrades the
//! candidate to `sync_failed` and moves on, because the source-of-truth
//! write has already succeeded.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::{CandidateRecord, Crm, GatewayError};
use crate::retry::{RetryError, RetryPolicy};

/// Read-mostly logical-field → external-field-id mapping with a short
/// TTL. Stale reads are tolerated until expiry triggers a refetch.
pub struct FieldMapCache {
    data: Option<HashMap<String, String>>,
    expiry: DateTime<Utc>,
    ttl: Duration,
}

impl FieldMapCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            data: None,
            // Born expired: first use fetches.
            expiry: Utc::now(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Forces a refetch on next access.
    pub fn invalidate(&mut self) {
        self.data = None;
        self.expiry = Utc::now();
    }

    fn get(
        &mut self,
        crm: &dyn Crm,
        retry: &RetryPolicy,
    ) -> Result<&HashMap<String, String>, RetryError<GatewayError>> {
        let fresh = self.data.is_some() && Utc::now() < self.expiry;
        if !fresh {
            let map = retry.run("crm_field_map", |_| crm.field_map())?;
            debug!(fields = map.len(), "refreshed CRM field map");
            self.expiry = Utc::now() + self.ttl;
            self.data = Some(map);
        }
        Ok(self.data.get_or_insert_with(HashMap::new))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("field-map fetch failed: {0}")]
    FieldMap(#[source] RetryError<GatewayError>),

    #[error("contact create failed: {0}")]
    Create(#[source] RetryError<GatewayError>),

    #[error("contact update failed: {0}")]
    Update(#[source] RetryError<GatewayError>),

    #[error("upload of '{name}' failed: {source}")]
    Upload {
        name: String,
        #[source]
        source: RetryError<GatewayError>,
    },
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub contact_id: String,
    /// URLs of the uploaded documents, in upload order.
    pub uploaded: Vec<String>,
}

pub struct SyncAdapter<'a> {
    crm: &'a dyn Crm,
    retry: RetryPolicy,
    cache: FieldMapCache,
}

impl<'a> SyncAdapter<'a> {
    pub fn new(crm: &'a dyn Crm, retry: RetryPolicy, cache: FieldMapCache) -> Self {
        Self { crm, retry, cache }
    }

    /// Creates (or, for a previously degraded candidate that already has
    /// a contact id, updates) the CRM contact and uploads every pack
    /// document.
    pub fn sync_candidate(
        &mut self,
        record: &CandidateRecord,
        attachments: &[(String, Vec<u8>)],
    ) -> Result<SyncOutcome, SyncError> {
        let fields = {
            let map = self
                .cache
                .get(self.crm, &self.retry)
                .map_err(SyncError::FieldMap)?;
            mapped_fields(record, map)
        };

        let contact_id = match &record.crm_contact_id {
            Some(existing) => {
                self.retry
                    .run("crm_update_contact", |_| {
                        self.crm.update(existing, &fields)
                    })
                    .map_err(SyncError::Update)?;
                existing.clone()
            }
            None => self
                .retry
                .run("crm_create_contact", |_| self.crm.create(&fields))
                .map_err(SyncError::Create)?,
        };

        let mut uploaded = Vec::with_capacity(attachments.len());
        for (name, bytes) in attachments {
            let url = self
                .retry
                .run("crm_upload_file", |_| {
                    self.crm.upload_file(&contact_id, bytes, name)
                })
                .map_err(|source| SyncError::Upload {
                    name: name.clone(),
                    source,
                })?;
            uploaded.push(url);
        }

        if uploaded.is_empty() {
            warn!(contact_id = %contact_id, "candidate synced without documents");
        }

        Ok(SyncOutcome {
            contact_id,
            uploaded,
        })
    }
}

/// Flattens the candidate into logical fields and renames each through
/// the field map. Fields the map does not know keep their logical name.
fn mapped_fields(
    record: &CandidateRecord,
    map: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut logical: Vec<(&str, String)> = Vec::new();

    if let Some(name) = &record.full_name {
        logical.push(("full_name", name.clone()));
    }
    if let Some(email) = &record.email {
        logical.push(("email", email.clone()));
    }
    if let Some(phone) = &record.phone {
        logical.push(("phone", phone.clone()));
    }
    if let Some(location) = &record.profile.location {
        logical.push(("location", location.clone()));
    }
    if let Some(summary) = &record.profile.summary {
        logical.push(("summary", summary.clone()));
    }
    if !record.profile.skills.is_empty() {
        logical.push(("skills", record.profile.skills.join("; ")));
    }

    logical
        .into_iter()
        .map(|(key, value)| {
            let external = map.get(key).cloned().unwrap_or_else(|| key.to_string());
            (external, value)
        })
        .collect()
}
