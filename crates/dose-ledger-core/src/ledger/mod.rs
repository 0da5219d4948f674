//! Commit ledger.
//!
//! Converts currently-uncommitted usage into an immutable, unit-scoped
//! commit record and deducts physical stock. The ledger row, usage-row
//! deletion, stock adjustment and audit entries execute inside one
//! transaction; a failure anywhere leaves nothing applied.

mod rollback;

use thiserror::Error;
use tracing::{info, warn};

use crate::aggregator::UsageAggregator;
use crate::db::{self, Database, DbError};
use crate::models::{AuditAction, CommitItem, CommitRecord};

/// Ledger operation errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Signature required to commit controlled items")]
    SignatureRequired,

    #[error("No items to commit")]
    NoItemsToCommit,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Commit already rolled back: {0}")]
    AlreadyRolledBack(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// The commit/rollback ledger over a record's usage.
pub struct CommitLedger<'a> {
    db: &'a mut Database,
}

impl<'a> CommitLedger<'a> {
    /// Create a new ledger over the given database.
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Commit the current usage of a record for one unit scope.
    ///
    /// Only items whose home unit equals `unit_scope` are committed,
    /// even though usage is computed record-wide. Every precondition is
    /// re-validated here regardless of what the client checked.
    pub fn commit(
        &mut self,
        record_id: &str,
        user_id: &str,
        signature: Option<&str>,
        unit_scope: &str,
    ) -> LedgerResult<CommitRecord> {
        // Fresh aggregation pass; only events after the last
        // non-rolled-back commit are visible, which is what makes a
        // repeated commit with no new events fail cleanly below.
        let usage = UsageAggregator::new(self.db).recalculate(record_id)?;

        let mut items = Vec::new();
        for row in &usage {
            let stock_item = match self.db.get_stock_item(&row.item_id)? {
                Some(item) => item,
                None => {
                    warn!(item_id = %row.item_id, "usage for unknown stock item skipped");
                    continue;
                }
            };
            if !stock_item.is_owned_by(unit_scope) {
                continue;
            }

            let quantity = row.effective_qty().round();
            if quantity <= 0.0 {
                continue;
            }

            items.push((
                CommitItem {
                    item_id: stock_item.id.clone(),
                    item_name: stock_item.name.clone(),
                    quantity,
                    controlled: stock_item.controlled,
                },
                stock_item.track_stock,
            ));
        }

        if items.is_empty() {
            return Err(LedgerError::NoItemsToCommit);
        }

        let signature = signature.map(str::trim).filter(|s| !s.is_empty());
        if items.iter().any(|(item, _)| item.controlled) && signature.is_none() {
            return Err(LedgerError::SignatureRequired);
        }

        let commit = CommitRecord::new(
            record_id.to_string(),
            unit_scope.to_string(),
            user_id.to_string(),
            signature.map(str::to_string),
            items.iter().map(|(item, _)| item.clone()).collect(),
        )?;

        let committed_item_ids: Vec<String> =
            commit.items.iter().map(|item| item.item_id.clone()).collect();

        let tx = self.db.transaction()?;
        db::insert_commit(&tx, &commit)?;
        // Deleting the usage rows resets the baseline: the next
        // aggregation counts only events after this commit.
        db::delete_usage_for_items(&tx, record_id, &committed_item_ids)?;
        for (item, track_stock) in &items {
            if *track_stock {
                db::adjust_on_hand(&tx, &item.item_id, -item.quantity)?;
            }
            if item.controlled {
                let movement = serde_json::json!({
                    "commit_id": commit.id,
                    "record_id": record_id,
                    "delta": -item.quantity,
                    "signature": commit.signature,
                })
                .to_string();
                db::append_audit(
                    &tx,
                    "stock_item",
                    &item.item_id,
                    AuditAction::Commit,
                    user_id,
                    None,
                    Some(&movement),
                    None,
                )?;
            }
        }
        tx.commit().map_err(DbError::from)?;

        info!(
            commit_id = %commit.id,
            record_id,
            unit_scope,
            item_count = commit.items.len(),
            "usage committed"
        );
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdministrationEvent, MedicationProfile, Patient, StockItem};

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Doe, Jane".into());
        patient.weight_kg = Some(70.0);
        db.upsert_patient(&patient).unwrap();
        db.upsert_record("r1", &patient.id).unwrap();

        let mut item = StockItem::new("i1".into(), "Cefazolin 1g".into(), "or-1".into());
        item.track_stock = true;
        item.on_hand = 10.0;
        db.upsert_stock_item(&item).unwrap();
        db.upsert_profile(&MedicationProfile::bolus("i1".into(), 1000.0, "mg".into()))
            .unwrap();
        db
    }

    fn bolus(t: &str, dose: &str) -> AdministrationEvent {
        AdministrationEvent::bolus("r1".into(), "i1".into(), t.into(), dose)
    }

    #[test]
    fn test_commit_snapshots_and_deducts() {
        let mut db = setup_db();
        db.insert_event(&bolus("2024-05-01T08:00:00Z", "1500")).unwrap();

        let commit = CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", None, "or-1")
            .unwrap();

        assert_eq!(commit.items.len(), 1);
        assert_eq!(commit.items[0].quantity, 2.0);
        assert_eq!(commit.items[0].item_name, "Cefazolin 1g");

        // Stock deducted, usage baseline reset
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 8.0);
        assert!(db.list_usage_for_record("r1").unwrap().is_empty());
    }

    #[test]
    fn test_commit_nothing_fails() {
        let mut db = setup_db();
        let result = CommitLedger::new(&mut db).commit("r1", "nurse-1", None, "or-1");
        assert!(matches!(result, Err(LedgerError::NoItemsToCommit)));
    }

    #[test]
    fn test_repeated_commit_fails_cleanly() {
        let mut db = setup_db();
        db.insert_event(&bolus("2024-05-01T08:00:00Z", "500")).unwrap();

        CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", None, "or-1")
            .unwrap();

        // No intervening events: the window is empty, no double deduction
        let result = CommitLedger::new(&mut db).commit("r1", "nurse-1", None, "or-1");
        assert!(matches!(result, Err(LedgerError::NoItemsToCommit)));
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 9.0);
    }

    #[test]
    fn test_controlled_requires_signature() {
        let mut db = setup_db();
        let mut fentanyl = StockItem::new("i2".into(), "Fentanyl 0.5mg".into(), "or-1".into());
        fentanyl.controlled = true;
        db.upsert_stock_item(&fentanyl).unwrap();
        db.upsert_profile(&MedicationProfile::bolus("i2".into(), 0.5, "mg".into()))
            .unwrap();
        db.insert_event(&AdministrationEvent::bolus(
            "r1".into(),
            "i2".into(),
            "2024-05-01T08:00:00Z".into(),
            "0.1",
        ))
        .unwrap();

        let result = CommitLedger::new(&mut db).commit("r1", "nurse-1", None, "or-1");
        assert!(matches!(result, Err(LedgerError::SignatureRequired)));

        // Whitespace signature does not satisfy the gate
        let result = CommitLedger::new(&mut db).commit("r1", "nurse-1", Some("  "), "or-1");
        assert!(matches!(result, Err(LedgerError::SignatureRequired)));

        let commit = CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", Some("J. Doe RN"), "or-1")
            .unwrap();
        assert_eq!(commit.signature.as_deref(), Some("J. Doe RN"));

        // Controlled movement is audited with the signature attached
        let audit = db.list_audit_entries("stock_item", "i2").unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Commit);
        assert!(audit[0].new_value.as_deref().unwrap().contains("J. Doe RN"));
    }

    #[test]
    fn test_unit_scope_isolation() {
        let mut db = setup_db();
        let mut icu_item = StockItem::new("i3".into(), "Midazolam 5mg".into(), "icu-2".into());
        icu_item.track_stock = true;
        icu_item.on_hand = 5.0;
        db.upsert_stock_item(&icu_item).unwrap();
        db.upsert_profile(&MedicationProfile::bolus("i3".into(), 5.0, "mg".into()))
            .unwrap();

        db.insert_event(&bolus("2024-05-01T08:00:00Z", "500")).unwrap();
        db.insert_event(&AdministrationEvent::bolus(
            "r1".into(),
            "i3".into(),
            "2024-05-01T08:05:00Z".into(),
            "2.5",
        ))
        .unwrap();

        let commit = CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", None, "or-1")
            .unwrap();

        // Foreign-unit item neither snapshotted nor deducted
        assert!(!commit.includes_item("i3"));
        assert_eq!(db.get_stock_item("i3").unwrap().unwrap().on_hand, 5.0);

        // Its usage survives for the owning unit to commit later
        let usage = db.list_usage_for_record("r1").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].item_id, "i3");
    }

    #[test]
    fn test_commit_respects_override() {
        let mut db = setup_db();
        db.insert_event(&bolus("2024-05-01T08:00:00Z", "500")).unwrap();

        UsageAggregator::new(&db).recalculate("r1").unwrap();
        db.set_usage_override("r1", "i1", 3.0, "extra ampule dropped", "nurse-1")
            .unwrap();

        let commit = CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", None, "or-1")
            .unwrap();
        assert_eq!(commit.items[0].quantity, 3.0);
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 7.0);
    }

    #[test]
    fn test_stock_deduction_floors_at_zero() {
        let mut db = setup_db();
        let mut item = db.get_stock_item("i1").unwrap().unwrap();
        item.on_hand = 1.0;
        db.upsert_stock_item(&item).unwrap();

        db.insert_event(&bolus("2024-05-01T08:00:00Z", "3000")).unwrap();

        CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", None, "or-1")
            .unwrap();
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 0.0);
    }
}
