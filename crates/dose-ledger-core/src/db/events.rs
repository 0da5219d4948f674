//! Administration event database operations.
//!
//! The timeline is append-mostly: inserts are plain, but every update or
//! delete writes an audit entry in the same transaction.

use rusqlite::{params, OptionalExtension};

use super::{append_audit, Database, DbError, DbResult};
use crate::models::{AdministrationEvent, AuditAction, EventKind};

impl Database {
    /// Insert a new administration event.
    pub fn insert_event(&self, event: &AdministrationEvent) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO administration_events (
                id, record_id, item_id, kind, timestamp, end_timestamp,
                dose, rate, session_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                event.id,
                event.record_id,
                event.item_id,
                event.kind.as_str(),
                event.timestamp,
                event.end_timestamp,
                event.dose,
                event.rate,
                event.session_id,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get an event by ID.
    pub fn get_event(&self, id: &str) -> DbResult<Option<AdministrationEvent>> {
        self.conn
            .query_row(
                r#"
                SELECT id, record_id, item_id, kind, timestamp, end_timestamp,
                       dose, rate, session_id, created_at
                FROM administration_events
                WHERE id = ?
                "#,
                [id],
                map_event_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Full timeline for a record, chronological.
    pub fn list_events_for_record(&self, record_id: &str) -> DbResult<Vec<AdministrationEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, record_id, item_id, kind, timestamp, end_timestamp,
                   dose, rate, session_id, created_at
            FROM administration_events
            WHERE record_id = ?
            ORDER BY timestamp, created_at
            "#,
        )?;

        let rows = stmt.query_map([record_id], map_event_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }

    /// Update an event, writing the audit entry in the same transaction.
    pub fn update_event(&mut self, event: &AdministrationEvent, user_id: &str) -> DbResult<()> {
        let old = self
            .get_event(&event.id)?
            .ok_or_else(|| DbError::NotFound(format!("administration event {}", event.id)))?;
        let old_json = serde_json::to_string(&old)?;
        let new_json = serde_json::to_string(event)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            UPDATE administration_events SET
                kind = ?2,
                timestamp = ?3,
                end_timestamp = ?4,
                dose = ?5,
                rate = ?6,
                session_id = ?7
            WHERE id = ?1
            "#,
            params![
                event.id,
                event.kind.as_str(),
                event.timestamp,
                event.end_timestamp,
                event.dose,
                event.rate,
                event.session_id,
            ],
        )?;
        append_audit(
            &tx,
            "administration_event",
            &event.id,
            AuditAction::Update,
            user_id,
            Some(&old_json),
            Some(&new_json),
            None,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete an event, writing the audit entry in the same transaction.
    pub fn delete_event(
        &mut self,
        event_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> DbResult<()> {
        let old = self
            .get_event(event_id)?
            .ok_or_else(|| DbError::NotFound(format!("administration event {}", event_id)))?;
        let old_json = serde_json::to_string(&old)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM administration_events WHERE id = ?",
            [event_id],
        )?;
        append_audit(
            &tx,
            "administration_event",
            event_id,
            AuditAction::Delete,
            user_id,
            Some(&old_json),
            None,
            reason,
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Intermediate row struct for database mapping.
struct EventRow {
    id: String,
    record_id: String,
    item_id: String,
    kind: String,
    timestamp: String,
    end_timestamp: Option<String>,
    dose: Option<String>,
    rate: Option<String>,
    session_id: Option<String>,
    created_at: String,
}

fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        record_id: row.get(1)?,
        item_id: row.get(2)?,
        kind: row.get(3)?,
        timestamp: row.get(4)?,
        end_timestamp: row.get(5)?,
        dose: row.get(6)?,
        rate: row.get(7)?,
        session_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl TryFrom<EventRow> for AdministrationEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let kind = EventKind::from_str(&row.kind)
            .ok_or_else(|| DbError::Constraint(format!("Unknown event kind: {}", row.kind)))?;

        Ok(AdministrationEvent {
            id: row.id,
            record_id: row.record_id,
            item_id: row.item_id,
            kind,
            timestamp: row.timestamp,
            end_timestamp: row.end_timestamp,
            dose: row.dose,
            rate: row.rate,
            session_id: row.session_id,
            created_at: row.created_at,
        })
    }
}
