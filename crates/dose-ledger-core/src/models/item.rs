//! Stock item models.

use serde::{Deserialize, Serialize};

/// A consumable stock item owned by an organizational unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockItem {
    /// Unique item ID
    pub id: String,
    /// Display name (snapshotted into commits at commit time)
    pub name: String,
    /// Home unit that owns this stock and may commit it
    pub unit_id: String,
    /// Controlled substance flag (commits require a signature)
    pub controlled: bool,
    /// Whether on-hand quantity is tracked at unit granularity
    pub track_stock: bool,
    /// Current on-hand quantity
    pub on_hand: f64,
    /// Whether this item is currently active
    pub active: bool,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl StockItem {
    /// Create a new stock item with required fields.
    pub fn new(id: String, name: String, unit_id: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            name,
            unit_id,
            controlled: false,
            track_stock: false,
            on_hand: 0.0,
            active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Check whether this item belongs to the given unit scope.
    pub fn is_owned_by(&self, unit_id: &str) -> bool {
        self.unit_id == unit_id
    }
}
