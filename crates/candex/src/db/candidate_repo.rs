//! Candidate repository — persisted profiles and duplicate lookups.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::capability::CandidateProfile;
use crate::gateway::{CandidateRecord, CandidateStatus};

use super::{parse_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<CandidateRecord, DatabaseError> {
    let status: String = row.get("status")?;
    let profile_json: String = row.get("profile")?;
    let documents_json: String = row.get("documents")?;

    let profile: CandidateProfile = serde_json::from_str(&profile_json)
        .map_err(|e| DatabaseError::Corrupt(format!("bad profile JSON: {}", e)))?;
    let documents: Vec<String> = serde_json::from_str(&documents_json)
        .map_err(|e| DatabaseError::Corrupt(format!("bad documents JSON: {}", e)))?;

    Ok(CandidateRecord {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        full_name: row.get("full_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        profile,
        documents,
        status: CandidateStatus::parse(&status).ok_or_else(|| {
            DatabaseError::Corrupt(format!("unknown candidate status '{}'", status))
        })?,
        crm_contact_id: row.get("crm_contact_id")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

/// Inserts a new candidate row.
pub fn insert(db: &Database, record: &CandidateRecord) -> Result<(), DatabaseError> {
    let profile = serde_json::to_string(&record.profile)
        .map_err(|e| DatabaseError::Corrupt(format!("unserializable profile: {}", e)))?;
    let documents = serde_json::to_string(&record.documents)
        .map_err(|e| DatabaseError::Corrupt(format!("unserializable documents: {}", e)))?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO candidates (id, batch_id, full_name, email, phone, profile,
             documents, status, crm_contact_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.batch_id,
                record.full_name,
                record.email,
                record.phone,
                profile,
                documents,
                record.status.as_str(),
                record.crm_contact_id,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Finds a candidate by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CandidateRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM candidates WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Most recently updated candidate with the given normalized email.
pub fn find_by_email(
    db: &Database,
    email: &str,
) -> Result<Option<CandidateRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM candidates WHERE email = ?1 ORDER BY updated_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![email])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Most recently updated candidate with the given normalized phone.
pub fn find_by_phone(
    db: &Database,
    phone: &str,
) -> Result<Option<CandidateRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM candidates WHERE phone = ?1 ORDER BY updated_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![phone])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Updates sync status; `crm_contact_id` merges (None keeps the stored
/// value). The underlying profile data is never lost on degradation.
pub fn patch_status(
    db: &Database,
    id: &str,
    status: CandidateStatus,
    crm_contact_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE candidates SET status = ?2,
             crm_contact_id = COALESCE(?3, crm_contact_id), updated_at = ?4
             WHERE id = ?1",
            params![id, status.as_str(), crm_contact_id, now.to_rfc3339()],
        )?;
        Ok(())
    })
}
