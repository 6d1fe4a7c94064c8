//! Duplicate detection against the persisted candidate store and the
//! external relationship system.
//!
//! A match in either system routes the whole pack to the hold queue; the
//! system never auto-merges or overwrites an existing profile.

use std::fmt;

use thiserror::Error;

use crate::gateway::{CandidateStore, ContactQuery, Crm, GatewayError};
use crate::retry::{RetryError, RetryPolicy};
use crate::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    CandidateStore,
    Crm,
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSource::CandidateStore => f.write_str("candidate store"),
            MatchSource::Crm => f.write_str("relationship system"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub source: MatchSource,
    /// Candidate id or CRM contact id, depending on the source.
    pub reference: String,
}

#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("candidate store lookup failed: {0}")]
    Store(#[source] GatewayError),

    #[error(transparent)]
    Crm(#[from] RetryError<GatewayError>),
}

pub struct DuplicateDetector<'a> {
    candidates: &'a dyn CandidateStore,
    crm: &'a dyn Crm,
    retry: &'a RetryPolicy,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(
        candidates: &'a dyn CandidateStore,
        crm: &'a dyn Crm,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            candidates,
            crm,
            retry,
        }
    }

    /// Looks for an existing identity. Email is checked before phone; the
    /// local store before the external system. Inputs must already be
    /// normalized.
    pub fn find_match(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<DuplicateMatch>, DedupeError> {
        if let Some(email) = email {
            if let Some(record) = self
                .candidates
                .find(ContactQuery::Email(email))
                .map_err(DedupeError::Store)?
            {
                tracing::debug!(
                    email = %sanitize::redact_email(email),
                    "duplicate found in candidate store"
                );
                return Ok(Some(DuplicateMatch {
                    source: MatchSource::CandidateStore,
                    reference: record.id,
                }));
            }
        }

        if let Some(phone) = phone {
            if let Some(record) = self
                .candidates
                .find(ContactQuery::Phone(phone))
                .map_err(DedupeError::Store)?
            {
                tracing::debug!(
                    phone = %sanitize::redact_phone(phone),
                    "duplicate found in candidate store"
                );
                return Ok(Some(DuplicateMatch {
                    source: MatchSource::CandidateStore,
                    reference: record.id,
                }));
            }
        }

        if let Some(email) = email {
            if let Some(contact_id) = self
                .retry
                .run("crm_search_email", |_| {
                    self.crm.search(ContactQuery::Email(email))
                })?
            {
                return Ok(Some(DuplicateMatch {
                    source: MatchSource::Crm,
                    reference: contact_id,
                }));
            }
        }

        if let Some(phone) = phone {
            if let Some(contact_id) = self
                .retry
                .run("crm_search_phone", |_| {
                    self.crm.search(ContactQuery::Phone(phone))
                })?
            {
                return Ok(Some(DuplicateMatch {
                    source: MatchSource::Crm,
                    reference: contact_id,
                }));
            }
        }

        Ok(None)
    }
}
