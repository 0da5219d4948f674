//! Rollback engine.
//!
//! Reverses a commit: stamps the rollback fields (soft invalidation,
//! never deletion), restores on-hand stock, writes compensating audit
//! entries for controlled items, and re-runs the aggregator so the
//! reverted event window becomes visible again.

use tracing::{info, warn};

use crate::aggregator::UsageAggregator;
use crate::db::{self, DbError};
use crate::models::{AuditAction, CommitRecord};

use super::{CommitLedger, LedgerError, LedgerResult};

impl CommitLedger<'_> {
    /// Roll back a commit.
    ///
    /// `unit_scope`, when present, must match the commit's owning unit;
    /// a mismatch is an access violation, not a filter.
    pub fn rollback(
        &mut self,
        commit_id: &str,
        user_id: &str,
        reason: &str,
        unit_scope: Option<&str>,
    ) -> LedgerResult<CommitRecord> {
        let commit = self
            .db
            .get_commit(commit_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("commit {}", commit_id)))?;

        if commit.is_rolled_back() {
            return Err(LedgerError::AlreadyRolledBack(commit_id.to_string()));
        }
        if let Some(unit) = unit_scope {
            if commit.unit_id != unit {
                return Err(LedgerError::AccessDenied(format!(
                    "commit {} belongs to unit {}",
                    commit_id, commit.unit_id
                )));
            }
        }
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation(
                "rollback reason must not be empty".into(),
            ));
        }

        let rolled_back_at = chrono::Utc::now().to_rfc3339();

        let tx = self.db.transaction()?;
        db::mark_rolled_back(&tx, commit_id, &rolled_back_at, user_id, reason.trim())?;
        for item in &commit.items {
            // Tracking mode is live item state; the controlled flag
            // comes from the snapshot.
            match db::get_stock_item(&tx, &item.item_id)? {
                Some(stock_item) if stock_item.track_stock => {
                    db::adjust_on_hand(&tx, &item.item_id, item.quantity)?;
                }
                Some(_) => {}
                None => {
                    warn!(item_id = %item.item_id, "snapshot item no longer in catalog, stock not restored");
                }
            }

            if item.controlled {
                let movement = serde_json::json!({
                    "commit_id": commit.id,
                    "record_id": commit.record_id,
                    "delta": item.quantity,
                })
                .to_string();
                db::append_audit(
                    &tx,
                    "stock_item",
                    &item.item_id,
                    AuditAction::Rollback,
                    user_id,
                    None,
                    Some(&movement),
                    Some(reason.trim()),
                )?;
            }
        }
        tx.commit().map_err(DbError::from)?;

        // The reversed commit no longer bounds the aggregation window,
        // so the usage it covered reappears on this pass.
        UsageAggregator::new(self.db).recalculate(&commit.record_id)?;

        info!(commit_id, record_id = %commit.record_id, "commit rolled back");

        self.db
            .get_commit(commit_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("commit {}", commit_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{AdministrationEvent, MedicationProfile, Patient, StockItem};

    fn setup_committed() -> (Database, CommitRecord) {
        let mut db = Database::open_in_memory().unwrap();
        let mut patient = Patient::new("Doe, Jane".into());
        patient.weight_kg = Some(70.0);
        db.upsert_patient(&patient).unwrap();
        db.upsert_record("r1", &patient.id).unwrap();

        let mut item = StockItem::new("i1".into(), "Fentanyl 0.5mg".into(), "or-1".into());
        item.controlled = true;
        item.track_stock = true;
        item.on_hand = 10.0;
        db.upsert_stock_item(&item).unwrap();
        db.upsert_profile(&MedicationProfile::bolus("i1".into(), 0.5, "mg".into()))
            .unwrap();

        db.insert_event(&AdministrationEvent::bolus(
            "r1".into(),
            "i1".into(),
            "2024-05-01T08:00:00Z".into(),
            "0.25",
        ))
        .unwrap();

        let commit = CommitLedger::new(&mut db)
            .commit("r1", "nurse-1", Some("J. Doe RN"), "or-1")
            .unwrap();
        (db, commit)
    }

    #[test]
    fn test_rollback_restores_stock_and_usage() {
        let (mut db, commit) = setup_committed();
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 9.0);
        assert!(db.list_usage_for_record("r1").unwrap().is_empty());

        let reverted = CommitLedger::new(&mut db)
            .rollback(&commit.id, "charge-1", "committed on wrong record", None)
            .unwrap();

        assert!(reverted.is_rolled_back());
        assert_eq!(reverted.rolled_back_by.as_deref(), Some("charge-1"));
        // Snapshot retained verbatim through the rollback
        assert_eq!(reverted.items, commit.items);
        assert_eq!(reverted.snapshot_hash, commit.snapshot_hash);

        // Stock restored to its pre-commit value
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 10.0);

        // The event window is visible again and usage reappears
        let usage = db.list_usage_for_record("r1").unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].calculated_qty, 1.0);
    }

    #[test]
    fn test_rollback_twice_fails() {
        let (mut db, commit) = setup_committed();

        CommitLedger::new(&mut db)
            .rollback(&commit.id, "charge-1", "wrong record", None)
            .unwrap();
        let result =
            CommitLedger::new(&mut db).rollback(&commit.id, "charge-1", "again", None);
        assert!(matches!(result, Err(LedgerError::AlreadyRolledBack(_))));

        // Stock restored exactly once
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 10.0);
    }

    #[test]
    fn test_rollback_unknown_commit() {
        let (mut db, _) = setup_committed();
        let result = CommitLedger::new(&mut db).rollback("missing", "charge-1", "why", None);
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_rollback_foreign_unit_denied() {
        let (mut db, commit) = setup_committed();
        let result = CommitLedger::new(&mut db).rollback(
            &commit.id,
            "charge-1",
            "wrong record",
            Some("icu-2"),
        );
        assert!(matches!(result, Err(LedgerError::AccessDenied(_))));

        // Nothing applied
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 9.0);
        assert!(!db.get_commit(&commit.id).unwrap().unwrap().is_rolled_back());
    }

    #[test]
    fn test_rollback_requires_reason() {
        let (mut db, commit) = setup_committed();
        let result = CommitLedger::new(&mut db).rollback(&commit.id, "charge-1", "  ", None);
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_rollback_writes_compensating_audit() {
        let (mut db, commit) = setup_committed();

        CommitLedger::new(&mut db)
            .rollback(&commit.id, "charge-1", "wrong record", None)
            .unwrap();

        let audit = db.list_audit_entries("stock_item", "i1").unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].action, AuditAction::Commit);
        assert_eq!(audit[1].action, AuditAction::Rollback);
        assert!(audit[1].new_value.as_deref().unwrap().contains("\"delta\":1.0"));
    }

    #[test]
    fn test_recommit_after_rollback() {
        let (mut db, commit) = setup_committed();

        CommitLedger::new(&mut db)
            .rollback(&commit.id, "charge-1", "wrong signature", None)
            .unwrap();

        // The same window can be committed again
        let second = CommitLedger::new(&mut db)
            .commit("r1", "nurse-2", Some("A. Smith RN"), "or-1")
            .unwrap();
        assert_eq!(second.items, commit.items);
        assert_eq!(db.get_stock_item("i1").unwrap().unwrap().on_hand, 9.0);
    }
}
