//! Batch repository — state-machine bookkeeping for the `batches` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::gateway::{BatchRecord, BatchStatus};

use super::{parse_opt_ts, parse_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<BatchRecord, DatabaseError> {
    let status: String = row.get("status")?;
    Ok(BatchRecord {
        id: row.get("id")?,
        status: BatchStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Corrupt(format!("unknown batch status '{}'", status)))?,
        file_count: row.get("file_count")?,
        processed_count: row.get("processed_count")?,
        error: row.get("error")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        started_at: parse_opt_ts(row.get("started_at")?)?,
        recovered_at: parse_opt_ts(row.get("recovered_at")?)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

/// Inserts a new batch row.
pub fn insert(db: &Database, batch: &BatchRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batches (id, status, file_count, processed_count, error,
             created_at, started_at, recovered_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                batch.id,
                batch.status.as_str(),
                batch.file_count,
                batch.processed_count,
                batch.error,
                batch.created_at.to_rfc3339(),
                batch.started_at.map(|t| t.to_rfc3339()),
                batch.recovered_at.map(|t| t.to_rfc3339()),
                batch.completed_at.map(|t| t.to_rfc3339()),
                batch.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Finds a batch by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<BatchRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Conditional claim: `pending` → `processing`. Returns true only when
/// this call performed the transition (compare-and-set on status).
pub fn claim_processing(
    db: &Database,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE batches SET status = 'processing', started_at = ?2, updated_at = ?2,
             error = NULL
             WHERE id = ?1 AND status = 'pending'",
            params![id, now.to_rfc3339()],
        )?;
        Ok(affected == 1)
    })
}

/// Marks a timed-out `processing` batch as recovered and restarts its
/// clock. Returns true when the marker was written.
pub fn mark_recovered(
    db: &Database,
    id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE batches SET recovered_at = ?2, started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'processing'",
            params![id, now.to_rfc3339()],
        )?;
        Ok(affected == 1)
    })
}

/// Terminal bookkeeping: final status, counters and optional error.
/// `completed_at` is only stamped for `complete` and `failed`.
pub fn finish(
    db: &Database,
    id: &str,
    status: BatchStatus,
    processed_count: u32,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let completed_at = match status {
        BatchStatus::Complete | BatchStatus::Failed => Some(now.to_rfc3339()),
        _ => None,
    };
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE batches SET status = ?2, processed_count = ?3, error = ?4,
             completed_at = COALESCE(?5, completed_at), updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                processed_count,
                error,
                completed_at,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}
