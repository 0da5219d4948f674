//! Commit record models.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One item line inside a commit snapshot.
///
/// Name and controlled flag are captured at commit time and never
/// re-joined to live item state, so historical commits stay accurate if
/// the catalog changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitItem {
    /// Stock item ID
    pub item_id: String,
    /// Item name at commit time
    pub item_name: String,
    /// Committed quantity (whole ampules/containers)
    pub quantity: f64,
    /// Controlled flag at commit time
    pub controlled: bool,
}

/// An immutable, unit-scoped snapshot of committed usage.
///
/// Created once; the rollback fields are the only permitted mutation
/// (soft invalidation, never deletion).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    /// Unique commit ID
    pub id: String,
    /// Clinical record the usage was derived from
    pub record_id: String,
    /// Owning unit scope of the committed stock
    pub unit_id: String,
    /// Who committed
    pub committed_by: String,
    /// Signature; required iff any snapshot item is controlled
    pub signature: Option<String>,
    /// Denormalized items snapshot (a value, never re-joined)
    pub items: Vec<CommitItem>,
    /// SHA-256 of the canonical items JSON, for tamper evidence
    pub snapshot_hash: String,
    /// Commit timestamp; bounds the next aggregation window
    pub committed_at: String,
    /// Rollback timestamp, if reversed
    pub rolled_back_at: Option<String>,
    /// Who rolled back
    pub rolled_back_by: Option<String>,
    /// Why it was rolled back
    pub rollback_reason: Option<String>,
}

impl CommitRecord {
    /// Create a new commit record, stamping the snapshot hash.
    pub fn new(
        record_id: String,
        unit_id: String,
        committed_by: String,
        signature: Option<String>,
        items: Vec<CommitItem>,
    ) -> Result<Self, serde_json::Error> {
        let snapshot_hash = snapshot_hash(&items)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            record_id,
            unit_id,
            committed_by,
            signature,
            items,
            snapshot_hash,
            committed_at: chrono::Utc::now().to_rfc3339(),
            rolled_back_at: None,
            rolled_back_by: None,
            rollback_reason: None,
        })
    }

    /// Whether this commit has been reversed.
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back_at.is_some()
    }

    /// Whether any snapshot item is a controlled substance.
    pub fn has_controlled_items(&self) -> bool {
        self.items.iter().any(|item| item.controlled)
    }

    /// Whether the snapshot includes the given item.
    pub fn includes_item(&self, item_id: &str) -> bool {
        self.items.iter().any(|item| item.item_id == item_id)
    }

    /// Verify the stored hash against the stored snapshot.
    pub fn verify_snapshot(&self) -> Result<bool, serde_json::Error> {
        Ok(snapshot_hash(&self.items)? == self.snapshot_hash)
    }
}

/// Serialize items to canonical JSON for hashing.
pub fn canonical_items_json(items: &[CommitItem]) -> Result<String, serde_json::Error> {
    serde_json::to_string(items)
}

/// Compute the SHA-256 hash of an items snapshot.
pub fn snapshot_hash(items: &[CommitItem]) -> Result<String, serde_json::Error> {
    let payload = canonical_items_json(items)?;
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
