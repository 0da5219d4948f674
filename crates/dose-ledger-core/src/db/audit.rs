//! Audit log database operations.
//!
//! The audit table is append-only; schema triggers reject UPDATE and
//! DELETE, so these operations can only ever add entries.

use rusqlite::{params, Connection};

use super::{Database, DbError, DbResult};
use crate::models::{AuditAction, AuditEntry};

impl Database {
    /// Append an audit entry. Returns the assigned row ID.
    #[allow(clippy::too_many_arguments)]
    pub fn append_audit(
        &self,
        record_type: &str,
        record_id: &str,
        action: AuditAction,
        user_id: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
        reason: Option<&str>,
    ) -> DbResult<i64> {
        append_audit(
            &self.conn,
            record_type,
            record_id,
            action,
            user_id,
            old_value,
            new_value,
            reason,
        )
    }

    /// List audit entries for a given record, oldest first.
    pub fn list_audit_entries(
        &self,
        record_type: &str,
        record_id: &str,
    ) -> DbResult<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, record_type, record_id, action, user_id,
                   old_value, new_value, reason, timestamp
            FROM audit_log
            WHERE record_type = ? AND record_id = ?
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![record_type, record_id], |row| {
            Ok(AuditRow {
                id: row.get(0)?,
                record_type: row.get(1)?,
                record_id: row.get(2)?,
                action: row.get(3)?,
                user_id: row.get(4)?,
                old_value: row.get(5)?,
                new_value: row.get(6)?,
                reason: row.get(7)?,
                timestamp: row.get(8)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.try_into()?);
        }
        Ok(entries)
    }
}

/// Append an audit entry through a plain connection or open transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) fn append_audit(
    conn: &Connection,
    record_type: &str,
    record_id: &str,
    action: AuditAction,
    user_id: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    reason: Option<&str>,
) -> DbResult<i64> {
    conn.execute(
        r#"
        INSERT INTO audit_log (record_type, record_id, action, user_id, old_value, new_value, reason)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            record_type,
            record_id,
            action.as_str(),
            user_id,
            old_value,
            new_value,
            reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Intermediate row struct for database mapping.
struct AuditRow {
    id: i64,
    record_type: String,
    record_id: String,
    action: String,
    user_id: String,
    old_value: Option<String>,
    new_value: Option<String>,
    reason: Option<String>,
    timestamp: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::from_str(&row.action)
            .ok_or_else(|| DbError::Constraint(format!("Unknown audit action: {}", row.action)))?;

        Ok(AuditEntry {
            id: row.id,
            record_type: row.record_type,
            record_id: row.record_id,
            action,
            user_id: row.user_id,
            old_value: row.old_value,
            new_value: row.new_value,
            reason: row.reason,
            timestamp: row.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_append_and_list() {
        let db = setup_db();

        db.append_audit(
            "administration_event",
            "e1",
            AuditAction::Update,
            "nurse-1",
            Some(r#"{"dose":"10"}"#),
            Some(r#"{"dose":"20"}"#),
            None,
        )
        .unwrap();
        db.append_audit(
            "administration_event",
            "e1",
            AuditAction::Delete,
            "nurse-2",
            Some(r#"{"dose":"20"}"#),
            None,
            Some("charted in error"),
        )
        .unwrap();

        let entries = db.list_audit_entries("administration_event", "e1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Update);
        assert_eq!(entries[1].action, AuditAction::Delete);
        assert_eq!(entries[1].reason.as_deref(), Some("charted in error"));
    }

    #[test]
    fn test_entries_scoped_by_record() {
        let db = setup_db();

        db.append_audit(
            "administration_event",
            "e1",
            AuditAction::Update,
            "nurse-1",
            None,
            None,
            None,
        )
        .unwrap();
        db.append_audit(
            "stock_item",
            "i1",
            AuditAction::Commit,
            "nurse-1",
            None,
            Some(r#"{"delta":-2}"#),
            None,
        )
        .unwrap();

        assert_eq!(
            db.list_audit_entries("administration_event", "e1")
                .unwrap()
                .len(),
            1
        );
        assert_eq!(db.list_audit_entries("stock_item", "i1").unwrap().len(), 1);
        assert_eq!(db.list_audit_entries("stock_item", "e1").unwrap().len(), 0);
    }
}
