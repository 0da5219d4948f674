//! Patient and clinical record database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::{ClinicalRecord, Patient};

impl Database {
    /// Insert or update a patient.
    pub fn upsert_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO patients (id, name, weight_kg, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                weight_kg = excluded.weight_kg,
                updated_at = datetime('now')
            "#,
            params![patient.id, patient.name, patient.weight_kg, patient.created_at],
        )?;
        Ok(())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                "SELECT id, name, weight_kg, created_at, updated_at FROM patients WHERE id = ?",
                [id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        weight_kg: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Register a clinical record anchor for a patient.
    pub fn upsert_record(&self, record_id: &str, patient_id: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO clinical_records (id, patient_id)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET patient_id = excluded.patient_id
            "#,
            params![record_id, patient_id],
        )?;
        Ok(())
    }

    /// Get a clinical record anchor.
    pub fn get_record(&self, record_id: &str) -> DbResult<Option<ClinicalRecord>> {
        self.conn
            .query_row(
                "SELECT id, patient_id, created_at FROM clinical_records WHERE id = ?",
                [record_id],
                |row| {
                    Ok(ClinicalRecord {
                        id: row.get(0)?,
                        patient_id: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Patient weight for a record, if known.
    pub fn record_patient_weight(&self, record_id: &str) -> DbResult<Option<f64>> {
        self.conn
            .query_row(
                r#"
                SELECT p.weight_kg
                FROM clinical_records r
                JOIN patients p ON p.id = r.patient_id
                WHERE r.id = ?
                "#,
                [record_id],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()
            .map(|opt| opt.flatten())
            .map_err(Into::into)
    }

    /// List every record ID known to the store.
    pub fn list_record_ids(&self) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM clinical_records ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
