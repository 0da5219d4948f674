//! Commit record database operations.
//!
//! Commit rows are append-only; the rollback columns are the only
//! mutation ever applied after insert.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{CommitItem, CommitRecord};

impl Database {
    /// Insert a commit record.
    pub fn insert_commit(&self, commit: &CommitRecord) -> DbResult<()> {
        insert_commit(&self.conn, commit)
    }

    /// Get a commit by ID.
    pub fn get_commit(&self, id: &str) -> DbResult<Option<CommitRecord>> {
        self.conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COMMIT),
                [id],
                map_commit_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// List commits for a record, newest first, optionally scoped to a unit.
    pub fn list_commits(
        &self,
        record_id: &str,
        unit_scope: Option<&str>,
    ) -> DbResult<Vec<CommitRecord>> {
        let (sql, params_vec): (String, Vec<&str>) = match unit_scope {
            Some(unit) => (
                format!(
                    "{} WHERE record_id = ?1 AND unit_id = ?2 ORDER BY committed_at DESC",
                    SELECT_COMMIT
                ),
                vec![record_id, unit],
            ),
            None => (
                format!("{} WHERE record_id = ?1 ORDER BY committed_at DESC", SELECT_COMMIT),
                vec![record_id],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params_vec), map_commit_row)?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row?.try_into()?);
        }
        Ok(commits)
    }

    /// Commits for a record that have not been rolled back.
    pub fn list_active_commits(&self, record_id: &str) -> DbResult<Vec<CommitRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE record_id = ?1 AND rolled_back_at IS NULL ORDER BY committed_at",
            SELECT_COMMIT
        ))?;
        let rows = stmt.query_map([record_id], map_commit_row)?;

        let mut commits = Vec::new();
        for row in rows {
            commits.push(row?.try_into()?);
        }
        Ok(commits)
    }
}

/// Insert a commit record through a plain connection or open transaction.
pub(crate) fn insert_commit(conn: &Connection, commit: &CommitRecord) -> DbResult<()> {
    let items_json = serde_json::to_string(&commit.items)?;
    conn.execute(
        r#"
        INSERT INTO commit_records (
            id, record_id, unit_id, committed_by, signature, items,
            snapshot_hash, committed_at, rolled_back_at, rolled_back_by, rollback_reason
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            commit.id,
            commit.record_id,
            commit.unit_id,
            commit.committed_by,
            commit.signature,
            items_json,
            commit.snapshot_hash,
            commit.committed_at,
            commit.rolled_back_at,
            commit.rolled_back_by,
            commit.rollback_reason,
        ],
    )?;
    Ok(())
}

/// Stamp the rollback columns through an open transaction.
pub(crate) fn mark_rolled_back(
    conn: &Connection,
    commit_id: &str,
    rolled_back_at: &str,
    rolled_back_by: &str,
    reason: &str,
) -> DbResult<()> {
    let rows_affected = conn.execute(
        r#"
        UPDATE commit_records SET
            rolled_back_at = ?2,
            rolled_back_by = ?3,
            rollback_reason = ?4
        WHERE id = ?1 AND rolled_back_at IS NULL
        "#,
        params![commit_id, rolled_back_at, rolled_back_by, reason],
    )?;
    if rows_affected == 0 {
        return Err(DbError::Constraint(format!(
            "commit {} missing or already rolled back",
            commit_id
        )));
    }
    Ok(())
}

/// Intermediate row struct for database mapping.
struct CommitRow {
    id: String,
    record_id: String,
    unit_id: String,
    committed_by: String,
    signature: Option<String>,
    items: String,
    snapshot_hash: String,
    committed_at: String,
    rolled_back_at: Option<String>,
    rolled_back_by: Option<String>,
    rollback_reason: Option<String>,
}

const SELECT_COMMIT: &str = r#"
    SELECT id, record_id, unit_id, committed_by, signature, items,
           snapshot_hash, committed_at, rolled_back_at, rolled_back_by, rollback_reason
    FROM commit_records
"#;

fn map_commit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        id: row.get(0)?,
        record_id: row.get(1)?,
        unit_id: row.get(2)?,
        committed_by: row.get(3)?,
        signature: row.get(4)?,
        items: row.get(5)?,
        snapshot_hash: row.get(6)?,
        committed_at: row.get(7)?,
        rolled_back_at: row.get(8)?,
        rolled_back_by: row.get(9)?,
        rollback_reason: row.get(10)?,
    })
}

impl TryFrom<CommitRow> for CommitRecord {
    type Error = DbError;

    fn try_from(row: CommitRow) -> Result<Self, Self::Error> {
        let items: Vec<CommitItem> = serde_json::from_str(&row.items)?;

        Ok(CommitRecord {
            id: row.id,
            record_id: row.record_id,
            unit_id: row.unit_id,
            committed_by: row.committed_by,
            signature: row.signature,
            items,
            snapshot_hash: row.snapshot_hash,
            committed_at: row.committed_at,
            rolled_back_at: row.rolled_back_at,
            rolled_back_by: row.rolled_back_by,
            rollback_reason: row.rollback_reason,
        })
    }
}
