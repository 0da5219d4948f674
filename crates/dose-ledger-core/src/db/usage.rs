//! Usage record database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::UsageRecord;

impl Database {
    /// Upsert the calculated quantity for a (record, item) pair.
    ///
    /// Override fields on an existing row are left untouched; the
    /// aggregator's skip-overridden rule is enforced by the caller.
    pub fn upsert_calculated_usage(
        &self,
        record_id: &str,
        item_id: &str,
        calculated_qty: f64,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO usage_records (id, record_id, item_id, calculated_qty, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(record_id, item_id) DO UPDATE SET
                calculated_qty = excluded.calculated_qty,
                updated_at = datetime('now')
            WHERE usage_records.calculated_qty != excluded.calculated_qty
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                record_id,
                item_id,
                calculated_qty,
            ],
        )?;
        Ok(())
    }

    /// Get the usage record for a (record, item) pair.
    pub fn get_usage_record(&self, record_id: &str, item_id: &str) -> DbResult<Option<UsageRecord>> {
        self.conn
            .query_row(
                &format!("{} WHERE record_id = ?1 AND item_id = ?2", SELECT_USAGE),
                params![record_id, item_id],
                map_usage_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get a usage record by its own ID.
    pub fn get_usage_record_by_id(&self, id: &str) -> DbResult<Option<UsageRecord>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_USAGE),
                [id],
                map_usage_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All usage records for a clinical record.
    pub fn list_usage_for_record(&self, record_id: &str) -> DbResult<Vec<UsageRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE record_id = ?1 ORDER BY item_id", SELECT_USAGE))?;
        let rows = stmt.query_map([record_id], map_usage_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Delete the usage record for a (record, item) pair.
    pub fn delete_usage_record(&self, record_id: &str, item_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM usage_records WHERE record_id = ?1 AND item_id = ?2",
            params![record_id, item_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Place a manual override on a (record, item) pair, creating the
    /// usage record if absent. Returns the updated record.
    pub fn set_usage_override(
        &self,
        record_id: &str,
        item_id: &str,
        quantity: f64,
        reason: &str,
        user_id: &str,
    ) -> DbResult<UsageRecord> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO usage_records (
                id, record_id, item_id, calculated_qty,
                override_qty, override_reason, overridden_by, overridden_at, updated_at
            ) VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(record_id, item_id) DO UPDATE SET
                override_qty = excluded.override_qty,
                override_reason = excluded.override_reason,
                overridden_by = excluded.overridden_by,
                overridden_at = excluded.overridden_at,
                updated_at = datetime('now')
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                record_id,
                item_id,
                quantity,
                reason,
                user_id,
                now,
            ],
        )?;

        self.get_usage_record(record_id, item_id)?
            .ok_or_else(|| DbError::NotFound(format!("usage record {}/{}", record_id, item_id)))
    }

    /// Clear the override on a usage record; the aggregator regains
    /// authority on its next run.
    pub fn clear_usage_override(&self, usage_id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE usage_records SET
                override_qty = NULL,
                override_reason = NULL,
                overridden_by = NULL,
                overridden_at = NULL,
                updated_at = datetime('now')
            WHERE id = ?
            "#,
            [usage_id],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Delete usage rows for the given items through an open transaction.
pub(crate) fn delete_usage_for_items(
    conn: &Connection,
    record_id: &str,
    item_ids: &[String],
) -> DbResult<usize> {
    let mut deleted = 0;
    for item_id in item_ids {
        deleted += conn.execute(
            "DELETE FROM usage_records WHERE record_id = ?1 AND item_id = ?2",
            params![record_id, item_id],
        )?;
    }
    Ok(deleted)
}

const SELECT_USAGE: &str = r#"
    SELECT id, record_id, item_id, calculated_qty,
           override_qty, override_reason, overridden_by, overridden_at, updated_at
    FROM usage_records
"#;

fn map_usage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    Ok(UsageRecord {
        id: row.get(0)?,
        record_id: row.get(1)?,
        item_id: row.get(2)?,
        calculated_qty: row.get(3)?,
        override_qty: row.get(4)?,
        override_reason: row.get(5)?,
        overridden_by: row.get(6)?,
        overridden_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Patient, StockItem};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let patient = Patient::new("Doe, Jane".into());
        db.upsert_patient(&patient).unwrap();
        db.upsert_record("r1", &patient.id).unwrap();
        db.upsert_stock_item(&StockItem::new("i1".into(), "Propofol".into(), "or-1".into()))
            .unwrap();
        db
    }

    #[test]
    fn test_upsert_preserves_id_and_override() {
        let db = setup_db();

        db.upsert_calculated_usage("r1", "i1", 2.0).unwrap();
        let first = db.get_usage_record("r1", "i1").unwrap().unwrap();

        db.set_usage_override("r1", "i1", 4.0, "spillage", "nurse-1")
            .unwrap();
        db.upsert_calculated_usage("r1", "i1", 3.0).unwrap();

        let second = db.get_usage_record("r1", "i1").unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.calculated_qty, 3.0);
        assert_eq!(second.override_qty, Some(4.0));
        assert_eq!(second.override_reason.as_deref(), Some("spillage"));
    }

    #[test]
    fn test_set_override_creates_row() {
        let db = setup_db();

        let usage = db
            .set_usage_override("r1", "i1", 1.0, "manual count", "nurse-1")
            .unwrap();
        assert_eq!(usage.calculated_qty, 0.0);
        assert_eq!(usage.override_qty, Some(1.0));
        assert_eq!(usage.overridden_by.as_deref(), Some("nurse-1"));
    }

    #[test]
    fn test_clear_override() {
        let db = setup_db();

        let usage = db
            .set_usage_override("r1", "i1", 1.0, "manual count", "nurse-1")
            .unwrap();
        assert!(db.clear_usage_override(&usage.id).unwrap());

        let cleared = db.get_usage_record_by_id(&usage.id).unwrap().unwrap();
        assert!(cleared.override_qty.is_none());
        assert!(cleared.override_reason.is_none());
        assert!(cleared.overridden_by.is_none());

        // Clearing a missing row reports false
        assert!(!db.clear_usage_override("no-such-id").unwrap());
    }

    #[test]
    fn test_delete_usage_record() {
        let db = setup_db();

        db.upsert_calculated_usage("r1", "i1", 2.0).unwrap();
        assert!(db.delete_usage_record("r1", "i1").unwrap());
        assert!(db.get_usage_record("r1", "i1").unwrap().is_none());
        assert!(!db.delete_usage_record("r1", "i1").unwrap());
    }
}
