//! Usage-ledger repository — append-only daily metering rows.

use chrono::NaiveDate;
use rusqlite::params;

use crate::gateway::{DailyUsage, UsageEntry};

use super::{Database, DatabaseError};

/// Appends one ledger entry. Rows are never updated in place.
pub fn append(db: &Database, entry: &UsageEntry) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO usage_ledger (day, operation, call_count, estimated_cost, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.day.to_string(),
                entry.operation.as_str(),
                entry.call_count,
                entry.estimated_cost,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Sums all entries recorded for one UTC day.
pub fn usage_for_day(db: &Database, day: NaiveDate) -> Result<DailyUsage, DatabaseError> {
    db.with_conn(|conn| {
        let (calls, cost): (u64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(call_count), 0), COALESCE(SUM(estimated_cost), 0.0)
             FROM usage_ledger WHERE day = ?1",
            params![day.to_string()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(DailyUsage { day, calls, cost })
    })
}

/// Number of ledger rows for one day (test and diagnostics helper).
pub fn count_for_day(db: &Database, day: NaiveDate) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM usage_ledger WHERE day = ?1",
            params![day.to_string()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
