//! Hold-queue repository — durable pack snapshots awaiting manual
//! disposition. Rows are only ever inserted here; disposition happens
//! outside this crate.

use rusqlite::{params, Row};

use crate::gateway::{HoldEntry, HoldReason};
use crate::identity::{DocumentMeta, MergedIdentity};

use super::{parse_ts, Database, DatabaseError};

fn from_row(row: &Row<'_>) -> Result<HoldEntry, DatabaseError> {
    let reason: String = row.get("reason")?;
    let identity_json: String = row.get("identity")?;
    let documents_json: String = row.get("documents")?;

    let identity: MergedIdentity = serde_json::from_str(&identity_json)
        .map_err(|e| DatabaseError::Corrupt(format!("bad identity JSON: {}", e)))?;
    let documents: Vec<DocumentMeta> = serde_json::from_str(&documents_json)
        .map_err(|e| DatabaseError::Corrupt(format!("bad documents JSON: {}", e)))?;

    Ok(HoldEntry {
        id: row.get("id")?,
        batch_id: row.get("batch_id")?,
        pack_id: row.get("pack_id")?,
        reason: HoldReason::parse(&reason)
            .ok_or_else(|| DatabaseError::Corrupt(format!("unknown hold reason '{}'", reason)))?,
        identity,
        documents,
        preview: row.get("preview")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?)?,
    })
}

/// Inserts one hold-queue entry.
pub fn insert(db: &Database, entry: &HoldEntry) -> Result<(), DatabaseError> {
    let identity = serde_json::to_string(&entry.identity)
        .map_err(|e| DatabaseError::Corrupt(format!("unserializable identity: {}", e)))?;
    let documents = serde_json::to_string(&entry.documents)
        .map_err(|e| DatabaseError::Corrupt(format!("unserializable documents: {}", e)))?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO hold_queue (id, batch_id, pack_id, reason, identity,
             documents, preview, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.batch_id,
                entry.pack_id,
                entry.reason.as_str(),
                identity,
                documents,
                entry.preview,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// All hold entries of a batch, oldest first.
pub fn list_for_batch(db: &Database, batch_id: &str) -> Result<Vec<HoldEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM hold_queue WHERE batch_id = ?1 ORDER BY created_at")?;
        let mut rows = stmt.query(params![batch_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(from_row(row)?);
        }
        Ok(entries)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_insert_and_list_round_trip() {
        let db = test_db();
        let entry = HoldEntry {
            id: "hold-1".to_string(),
            batch_id: "b1".to_string(),
            pack_id: "pack-1".to_string(),
            reason: HoldReason::MissingCvFile,
            identity: MergedIdentity {
                email: Some("jane@example.com".to_string()),
                full_name: Some("Jane Doe".to_string()),
                ..Default::default()
            },
            documents: vec![DocumentMeta {
                file_path: "b1/letter.pdf".to_string(),
                file_name: "letter.pdf".to_string(),
                document_type: crate::capability::DocumentType::CoverLetter,
            }],
            preview: "Dear hiring team".to_string(),
            created_at: Utc::now(),
        };
        insert(&db, &entry).unwrap();

        let entries = list_for_batch(&db, "b1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, HoldReason::MissingCvFile);
        assert_eq!(entries[0].identity.email.as_deref(), Some("jane@example.com"));
        assert_eq!(entries[0].documents[0].file_name, "letter.pdf");
    }

    #[test]
    fn test_list_empty_batch() {
        let db = test_db();
        assert!(list_for_batch(&db, "none").unwrap().is_empty());
    }
}
