//! Manual quantity overrides layered over aggregator output.
//!
//! An override wins over the calculated quantity until it is cleared;
//! resolution happens in one place, [`crate::models::UsageRecord::resolved`].

use tracing::info;

use crate::db::Database;
use crate::ledger::{LedgerError, LedgerResult};
use crate::models::UsageRecord;

/// Place a manual override on a (record, item) pair.
///
/// The usage record is created if absent (calculated quantity defaults
/// to zero). Quantity must be a non-negative number and the reason must
/// not be empty.
pub fn set_override(
    db: &Database,
    record_id: &str,
    item_id: &str,
    quantity: f64,
    reason: &str,
    user_id: &str,
) -> LedgerResult<UsageRecord> {
    if !quantity.is_finite() || quantity < 0.0 {
        return Err(LedgerError::Validation(
            "override quantity must be a non-negative number".into(),
        ));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::Validation(
            "override reason must not be empty".into(),
        ));
    }

    let usage = db.set_usage_override(record_id, item_id, quantity, reason, user_id)?;
    info!(record_id, item_id, quantity, user_id, "usage override set");
    Ok(usage)
}

/// Clear an override; the aggregator regains authority on its next run.
pub fn clear_override(db: &Database, usage_id: &str) -> LedgerResult<UsageRecord> {
    if !db.clear_usage_override(usage_id)? {
        return Err(LedgerError::NotFound(format!("usage record {}", usage_id)));
    }
    let usage = db
        .get_usage_record_by_id(usage_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("usage record {}", usage_id)))?;
    info!(usage_id, "usage override cleared");
    Ok(usage)
}
