//! Usage record models.

use serde::{Deserialize, Serialize};

/// Derived consumable usage for one (record, item) pair.
///
/// `calculated_qty` is recomputed idempotently by the aggregator; the
/// override fields layer a manual correction on top of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    /// Unique usage record ID
    pub id: String,
    /// Owning clinical record
    pub record_id: String,
    /// Stock item
    pub item_id: String,
    /// Aggregator-derived quantity (ampules/containers)
    pub calculated_qty: f64,
    /// Manual correction; non-null wins over `calculated_qty`
    pub override_qty: Option<f64>,
    /// Mandatory reason for the override
    pub override_reason: Option<String>,
    /// Who overrode
    pub overridden_by: Option<String>,
    /// When the override was placed
    pub overridden_at: Option<String>,
    /// Last update timestamp
    pub updated_at: String,
}

/// The resolved quantity of a usage record.
///
/// This is the single place where the calculated/override duality is
/// decided; call sites never null-check the override fields themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedQuantity {
    /// Aggregator output is authoritative
    Calculated(f64),
    /// A manual override is in effect
    Overridden {
        quantity: f64,
        reason: String,
        by: String,
        at: String,
    },
}

impl ResolvedQuantity {
    /// The effective quantity, regardless of provenance.
    pub fn quantity(&self) -> f64 {
        match self {
            ResolvedQuantity::Calculated(q) => *q,
            ResolvedQuantity::Overridden { quantity, .. } => *quantity,
        }
    }
}

impl UsageRecord {
    /// Create a new usage record from an aggregation result.
    pub fn new(record_id: String, item_id: String, calculated_qty: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            record_id,
            item_id,
            calculated_qty,
            override_qty: None,
            override_reason: None,
            overridden_by: None,
            overridden_at: None,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Resolve the calculated/override duality.
    pub fn resolved(&self) -> ResolvedQuantity {
        match self.override_qty {
            Some(quantity) => ResolvedQuantity::Overridden {
                quantity,
                reason: self.override_reason.clone().unwrap_or_default(),
                by: self.overridden_by.clone().unwrap_or_default(),
                at: self.overridden_at.clone().unwrap_or_default(),
            },
            None => ResolvedQuantity::Calculated(self.calculated_qty),
        }
    }

    /// Effective quantity via [`Self::resolved`].
    pub fn effective_qty(&self) -> f64 {
        self.resolved().quantity()
    }

    /// Whether a manual override is in effect.
    pub fn has_override(&self) -> bool {
        self.override_qty.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_without_override() {
        let usage = UsageRecord::new("r1".into(), "i1".into(), 2.0);
        assert_eq!(usage.resolved(), ResolvedQuantity::Calculated(2.0));
        assert_eq!(usage.effective_qty(), 2.0);
        assert!(!usage.has_override());
    }

    #[test]
    fn test_override_wins() {
        let mut usage = UsageRecord::new("r1".into(), "i1".into(), 2.0);
        usage.override_qty = Some(5.0);
        usage.override_reason = Some("broken ampule discarded".into());
        usage.overridden_by = Some("nurse-1".into());
        usage.overridden_at = Some("2024-05-01T08:00:00Z".into());

        assert_eq!(usage.effective_qty(), 5.0);
        assert!(usage.has_override());
        match usage.resolved() {
            ResolvedQuantity::Overridden { quantity, reason, .. } => {
                assert_eq!(quantity, 5.0);
                assert_eq!(reason, "broken ampule discarded");
            }
            other => panic!("expected override, got {:?}", other),
        }
    }

    #[test]
    fn test_override_zero_still_wins() {
        let mut usage = UsageRecord::new("r1".into(), "i1".into(), 2.0);
        usage.override_qty = Some(0.0);
        assert_eq!(usage.effective_qty(), 0.0);
    }
}
