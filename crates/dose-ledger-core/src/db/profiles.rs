//! Medication profile database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::MedicationProfile;

impl Database {
    /// Insert or update a medication profile.
    pub fn upsert_profile(&self, profile: &MedicationProfile) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO medication_profiles (
                item_id, rate_unit, ampule_content, administration_unit, updated_at
            ) VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(item_id) DO UPDATE SET
                rate_unit = excluded.rate_unit,
                ampule_content = excluded.ampule_content,
                administration_unit = excluded.administration_unit,
                updated_at = datetime('now')
            "#,
            params![
                profile.item_id,
                profile.rate_unit,
                profile.ampule_content,
                profile.administration_unit,
            ],
        )?;
        Ok(())
    }

    /// Get the profile for an item.
    pub fn get_profile(&self, item_id: &str) -> DbResult<Option<MedicationProfile>> {
        self.conn
            .query_row(
                r#"
                SELECT item_id, rate_unit, ampule_content, administration_unit, updated_at
                FROM medication_profiles
                WHERE item_id = ?
                "#,
                [item_id],
                |row| {
                    Ok(MedicationProfile {
                        item_id: row.get(0)?,
                        rate_unit: row.get(1)?,
                        ampule_content: row.get(2)?,
                        administration_unit: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }
}
