//! File-status repository — merge-upsert keyed by (batch_id, file_path).

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::capability::DocumentType;
use crate::gateway::{FilePatch, FileRecord, FileStatus};

use super::{parse_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<FileRecord, DatabaseError> {
    let status: String = row.get("status")?;
    let document_type: Option<String> = row.get("document_type")?;
    Ok(FileRecord {
        batch_id: row.get("batch_id")?,
        file_path: row.get("file_path")?,
        file_name: row.get("file_name")?,
        status: FileStatus::parse(&status)
            .ok_or_else(|| DatabaseError::Corrupt(format!("unknown file status '{}'", status)))?,
        document_type: document_type.as_deref().and_then(DocumentType::parse),
        pack_id: row.get("pack_id")?,
        candidate_id: row.get("candidate_id")?,
        error: row.get("error")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?)?,
    })
}

/// Merge-upserts one file row. Status and error always take the new
/// value; document_type, pack_id and candidate_id merge (a `None` patch
/// field keeps what is already stored), so repeated runs never lose
/// earlier bookkeeping.
pub fn upsert(
    db: &Database,
    batch_id: &str,
    file_path: &str,
    file_name: &str,
    patch: &FilePatch,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO files (batch_id, file_path, file_name, status, document_type,
             pack_id, candidate_id, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(batch_id, file_path) DO UPDATE SET
                 file_name = excluded.file_name,
                 status = excluded.status,
                 document_type = COALESCE(excluded.document_type, files.document_type),
                 pack_id = COALESCE(excluded.pack_id, files.pack_id),
                 candidate_id = COALESCE(excluded.candidate_id, files.candidate_id),
                 error = excluded.error,
                 updated_at = excluded.updated_at",
            params![
                batch_id,
                file_path,
                file_name,
                patch.status.as_str(),
                patch.document_type.map(|t| t.as_str()),
                patch.pack_id,
                patch.candidate_id,
                patch.error,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Finds one file row by its idempotency key.
pub fn find(
    db: &Database,
    batch_id: &str,
    file_path: &str,
) -> Result<Option<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM files WHERE batch_id = ?1 AND file_path = ?2")?;
        let mut rows = stmt.query(params![batch_id, file_path])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// All file rows of a batch, ordered by path for determinism.
pub fn list_for_batch(db: &Database, batch_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM files WHERE batch_id = ?1 ORDER BY file_path")?;
        let mut rows = stmt.query(params![batch_id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(from_row(row)?);
        }
        Ok(records)
    })
}

/// Counts files of the batch that reached a terminal status.
pub fn count_terminal(db: &Database, batch_id: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE batch_id = ?1
             AND status IN ('complete', 'failed', 'rejected')",
            params![batch_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
