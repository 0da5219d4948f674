//! Stock item database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::StockItem;

impl Database {
    /// Insert or update a stock item.
    pub fn upsert_stock_item(&self, item: &StockItem) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO stock_items (
                id, name, unit_id, controlled, track_stock, on_hand, active, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                unit_id = excluded.unit_id,
                controlled = excluded.controlled,
                track_stock = excluded.track_stock,
                on_hand = excluded.on_hand,
                active = excluded.active,
                updated_at = datetime('now')
            "#,
            params![
                item.id,
                item.name,
                item.unit_id,
                item.controlled,
                item.track_stock,
                item.on_hand,
                item.active,
            ],
        )?;
        Ok(())
    }

    /// Get a stock item by ID.
    pub fn get_stock_item(&self, id: &str) -> DbResult<Option<StockItem>> {
        get_stock_item(&self.conn, id)
    }

    /// List active stock items owned by a unit.
    pub fn list_stock_items_for_unit(&self, unit_id: &str) -> DbResult<Vec<StockItem>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, unit_id, controlled, track_stock, on_hand, active,
                   created_at, updated_at
            FROM stock_items
            WHERE unit_id = ? AND active = 1
            ORDER BY name
            "#,
        )?;

        let rows = stmt.query_map([unit_id], map_item_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Adjust on-hand quantity, floored at zero. Returns the new quantity.
    pub fn adjust_on_hand(&self, item_id: &str, delta: f64) -> DbResult<f64> {
        adjust_on_hand(&self.conn, item_id, delta)
    }
}

/// Get a stock item through a plain connection or open transaction.
pub(crate) fn get_stock_item(conn: &Connection, id: &str) -> DbResult<Option<StockItem>> {
    conn.query_row(
        r#"
        SELECT id, name, unit_id, controlled, track_stock, on_hand, active,
               created_at, updated_at
        FROM stock_items
        WHERE id = ?
        "#,
        [id],
        map_item_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Adjust on-hand quantity through a plain connection or open transaction.
///
/// Decrements floor at zero; restores add back without a cap.
pub(crate) fn adjust_on_hand(conn: &Connection, item_id: &str, delta: f64) -> DbResult<f64> {
    let rows_affected = conn.execute(
        "UPDATE stock_items SET on_hand = MAX(on_hand + ?1, 0), updated_at = datetime('now') WHERE id = ?2",
        params![delta, item_id],
    )?;
    if rows_affected == 0 {
        return Err(DbError::NotFound(format!("stock item {}", item_id)));
    }

    conn.query_row(
        "SELECT on_hand FROM stock_items WHERE id = ?",
        [item_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

fn map_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockItem> {
    Ok(StockItem {
        id: row.get(0)?,
        name: row.get(1)?,
        unit_id: row.get(2)?,
        controlled: row.get(3)?,
        track_stock: row.get(4)?,
        on_hand: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
