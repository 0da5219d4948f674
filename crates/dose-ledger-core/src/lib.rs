//! Dose-Ledger Core Library
//!
//! Medication usage aggregation and stock commit ledger for clinical
//! documentation systems.
//!
//! # Architecture
//!
//! ```text
//! Administration events (bolus / free-flow / rate-controlled)
//!                         │
//!                         ▼
//!               ┌───────────────────┐
//!               │  Usage Aggregator │  windowed by last commit per item,
//!               │  (pure derivation)│  re-run on read + periodic sweep
//!               └─────────┬─────────┘
//!                         │
//!            Usage Records (calculated, optionally overridden)
//!                         │
//!                         ▼
//!               ┌───────────────────┐       ┌──────────────────┐
//!               │   Commit Ledger   │──────▶│ Stock deduction  │
//!               │ (atomic snapshot) │       │ + audit entries  │
//!               └─────────┬─────────┘       └──────────────────┘
//!                         │
//!                         ▼
//!               ┌───────────────────┐
//!               │  Rollback Engine  │  soft invalidation, stock restore,
//!               │                   │  window becomes visible again
//!               └───────────────────┘
//! ```
//!
//! # Core Principle
//!
//! **Stock is deducted exactly once per event window.** The aggregator
//! only ever sees events after an item's last non-rolled-back commit, so
//! repeating a commit with no new events fails cleanly instead of
//! double-deducting.
//!
//! # Modules
//!
//! - [`db`]: SQLite database layer
//! - [`models`]: Domain types (StockItem, AdministrationEvent, CommitRecord, etc.)
//! - [`aggregator`]: Usage derivation from the event timeline
//! - [`overrides`]: Manual quantity corrections
//! - [`ledger`]: Transactional commit and rollback
//! - [`logging`]: Tracing setup for host applications

pub mod aggregator;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod overrides;

// Re-export commonly used types
pub use aggregator::UsageAggregator;
pub use db::Database;
pub use ledger::{CommitLedger, LedgerError};
pub use models::{
    AdministrationEvent, AuditEntry, CommitItem, CommitRecord, EventKind, MedicationProfile,
    Patient, ResolvedQuantity, StockItem, UsageRecord,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum DoseLedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Signature required: {0}")]
    SignatureRequired(String),

    #[error("No items to commit: {0}")]
    NoItemsToCommit(String),

    #[error("Already rolled back: {0}")]
    AlreadyRolledBack(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for DoseLedgerError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => DoseLedgerError::NotFound(what),
            other => DoseLedgerError::DatabaseError(other.to_string()),
        }
    }
}

impl From<LedgerError> for DoseLedgerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Validation(msg) => DoseLedgerError::InvalidInput(msg),
            LedgerError::AccessDenied(msg) => DoseLedgerError::AccessDenied(msg),
            LedgerError::SignatureRequired => {
                DoseLedgerError::SignatureRequired("controlled items need a signature".into())
            }
            LedgerError::NoItemsToCommit => {
                DoseLedgerError::NoItemsToCommit("nothing to commit for this unit".into())
            }
            LedgerError::NotFound(what) => DoseLedgerError::NotFound(what),
            LedgerError::AlreadyRolledBack(id) => DoseLedgerError::AlreadyRolledBack(id),
            LedgerError::Storage(e) => e.into(),
            LedgerError::Json(e) => DoseLedgerError::SerializationError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for DoseLedgerError {
    fn from(e: serde_json::Error) -> Self {
        DoseLedgerError::SerializationError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DoseLedgerError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DoseLedgerError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<DoseLedgerCore>, DoseLedgerError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(DoseLedgerCore {
        db: Arc::new(Mutex::new(db)),
    }))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<DoseLedgerCore>, DoseLedgerError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(DoseLedgerCore {
        db: Arc::new(Mutex::new(db)),
    }))
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct DoseLedgerCore {
    db: Arc<Mutex<Database>>,
}

#[uniffi::export]
impl DoseLedgerCore {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Add or update a stock item.
    pub fn upsert_stock_item(&self, item: FfiStockItem) -> Result<(), DoseLedgerError> {
        let db = self.db.lock()?;
        let stock_item = item.into();
        db.upsert_stock_item(&stock_item)?;
        Ok(())
    }

    /// Get a stock item by ID.
    pub fn get_stock_item(&self, id: String) -> Result<Option<FfiStockItem>, DoseLedgerError> {
        let db = self.db.lock()?;
        let item = db.get_stock_item(&id)?;
        Ok(item.map(|i| i.into()))
    }

    /// Adjust on-hand stock (e.g. restocking). Returns the new quantity.
    pub fn adjust_stock(&self, item_id: String, delta: f64) -> Result<f64, DoseLedgerError> {
        let db = self.db.lock()?;
        Ok(db.adjust_on_hand(&item_id, delta)?)
    }

    /// Add or update a medication profile.
    pub fn upsert_medication_profile(
        &self,
        profile: FfiMedicationProfile,
    ) -> Result<(), DoseLedgerError> {
        let db = self.db.lock()?;
        db.upsert_profile(&profile.into())?;
        Ok(())
    }

    // =========================================================================
    // Patient / Record Operations
    // =========================================================================

    /// Create a new patient.
    pub fn create_patient(
        &self,
        name: String,
        weight_kg: Option<f64>,
    ) -> Result<FfiPatient, DoseLedgerError> {
        let db = self.db.lock()?;
        let mut patient = Patient::new(name);
        patient.weight_kg = weight_kg;
        db.upsert_patient(&patient)?;
        Ok(patient.into())
    }

    /// Register a clinical record for a patient.
    pub fn upsert_record(
        &self,
        record_id: String,
        patient_id: String,
    ) -> Result<(), DoseLedgerError> {
        let db = self.db.lock()?;
        db.upsert_record(&record_id, &patient_id)?;
        Ok(())
    }

    // =========================================================================
    // Administration Events
    // =========================================================================

    /// Record a bolus administration.
    pub fn record_bolus(
        &self,
        record_id: String,
        item_id: String,
        timestamp: String,
        dose: String,
    ) -> Result<FfiAdministrationEvent, DoseLedgerError> {
        let db = self.db.lock()?;
        let event = AdministrationEvent::bolus(record_id, item_id, timestamp, &dose);
        db.insert_event(&event)?;
        Ok(event.into())
    }

    /// Record an infusion start.
    pub fn record_infusion_start(
        &self,
        record_id: String,
        item_id: String,
        timestamp: String,
        rate: Option<String>,
        session_id: Option<String>,
    ) -> Result<FfiAdministrationEvent, DoseLedgerError> {
        let db = self.db.lock()?;
        let event = AdministrationEvent::infusion_start(
            record_id,
            item_id,
            timestamp,
            rate.as_deref(),
            session_id.as_deref(),
        );
        db.insert_event(&event)?;
        Ok(event.into())
    }

    /// Record an infusion stop.
    pub fn record_infusion_stop(
        &self,
        record_id: String,
        item_id: String,
        timestamp: String,
        session_id: Option<String>,
    ) -> Result<FfiAdministrationEvent, DoseLedgerError> {
        let db = self.db.lock()?;
        let event =
            AdministrationEvent::infusion_stop(record_id, item_id, timestamp, session_id.as_deref());
        db.insert_event(&event)?;
        Ok(event.into())
    }

    /// Record a mid-session rate change.
    pub fn record_rate_change(
        &self,
        record_id: String,
        item_id: String,
        timestamp: String,
        rate: String,
        session_id: Option<String>,
    ) -> Result<FfiAdministrationEvent, DoseLedgerError> {
        let db = self.db.lock()?;
        let event = AdministrationEvent::rate_change(
            record_id,
            item_id,
            timestamp,
            &rate,
            session_id.as_deref(),
        );
        db.insert_event(&event)?;
        Ok(event.into())
    }

    /// Amend an event's editable fields. The change is audited.
    pub fn update_event(
        &self,
        event: FfiAdministrationEvent,
        user_id: String,
    ) -> Result<FfiAdministrationEvent, DoseLedgerError> {
        let mut db = self.db.lock()?;
        let existing = db
            .get_event(&event.id)?
            .ok_or_else(|| DoseLedgerError::NotFound(format!("administration event {}", event.id)))?;

        let kind = EventKind::from_str(&event.kind)
            .ok_or_else(|| DoseLedgerError::InvalidInput(format!("unknown event kind {}", event.kind)))?;

        let updated = AdministrationEvent {
            kind,
            timestamp: event.timestamp,
            end_timestamp: event.end_timestamp,
            dose: event.dose,
            rate: event.rate,
            session_id: event.session_id,
            ..existing
        };
        db.update_event(&updated, &user_id)?;
        Ok(updated.into())
    }

    /// Delete an event. The deletion is audited.
    pub fn delete_event(
        &self,
        event_id: String,
        user_id: String,
        reason: Option<String>,
    ) -> Result<(), DoseLedgerError> {
        let mut db = self.db.lock()?;
        db.delete_event(&event_id, &user_id, reason.as_deref())?;
        Ok(())
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Recompute usage for a record.
    pub fn recalculate(&self, record_id: String) -> Result<Vec<FfiUsageRecord>, DoseLedgerError> {
        let db = self.db.lock()?;
        let usage = UsageAggregator::new(&db).recalculate(&record_id)?;
        Ok(usage.into_iter().map(|u| u.into()).collect())
    }

    /// Current usage for a record. Always recomputes first.
    pub fn get_usage(&self, record_id: String) -> Result<Vec<FfiUsageRecord>, DoseLedgerError> {
        self.recalculate(record_id)
    }

    /// Place a manual override on an item's usage.
    pub fn set_override(
        &self,
        record_id: String,
        item_id: String,
        quantity: f64,
        reason: String,
        user_id: String,
    ) -> Result<FfiUsageRecord, DoseLedgerError> {
        let db = self.db.lock()?;
        let usage = overrides::set_override(&db, &record_id, &item_id, quantity, &reason, &user_id)?;
        Ok(usage.into())
    }

    /// Clear a manual override.
    pub fn clear_override(&self, usage_id: String) -> Result<FfiUsageRecord, DoseLedgerError> {
        let db = self.db.lock()?;
        let usage = overrides::clear_override(&db, &usage_id)?;
        Ok(usage.into())
    }

    /// Refresh all records with open infusions. Intended to be called
    /// by the host on a fixed interval (e.g. every 60 seconds).
    pub fn sweep_open_infusions(&self) -> Result<u32, DoseLedgerError> {
        let db = self.db.lock()?;
        Ok(UsageAggregator::new(&db).sweep_open_records()? as u32)
    }

    /// Whether a record has any infusion still running.
    pub fn has_open_infusions(&self, record_id: String) -> Result<bool, DoseLedgerError> {
        let db = self.db.lock()?;
        Ok(UsageAggregator::new(&db).has_open_sessions(&record_id)?)
    }

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Commit current usage for one unit scope.
    pub fn commit(
        &self,
        record_id: String,
        user_id: String,
        signature: Option<String>,
        unit_scope: String,
    ) -> Result<FfiCommitRecord, DoseLedgerError> {
        let mut db = self.db.lock()?;
        let commit = CommitLedger::new(&mut db).commit(
            &record_id,
            &user_id,
            signature.as_deref(),
            &unit_scope,
        )?;
        Ok(commit.into())
    }

    /// List commits for a record, optionally scoped to a unit.
    pub fn list_commits(
        &self,
        record_id: String,
        unit_scope: Option<String>,
    ) -> Result<Vec<FfiCommitRecord>, DoseLedgerError> {
        let db = self.db.lock()?;
        let commits = db.list_commits(&record_id, unit_scope.as_deref())?;
        Ok(commits.into_iter().map(|c| c.into()).collect())
    }

    /// Roll back a commit, restoring stock and re-exposing its window.
    pub fn rollback(
        &self,
        commit_id: String,
        user_id: String,
        reason: String,
        unit_scope: Option<String>,
    ) -> Result<FfiCommitRecord, DoseLedgerError> {
        let mut db = self.db.lock()?;
        let commit = CommitLedger::new(&mut db).rollback(
            &commit_id,
            &user_id,
            &reason,
            unit_scope.as_deref(),
        )?;
        Ok(commit.into())
    }

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Audit entries for a record, oldest first.
    pub fn list_audit_entries(
        &self,
        record_type: String,
        record_id: String,
    ) -> Result<Vec<FfiAuditEntry>, DoseLedgerError> {
        let db = self.db.lock()?;
        let entries = db.list_audit_entries(&record_type, &record_id)?;
        Ok(entries.into_iter().map(|e| e.into()).collect())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe stock item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockItem {
    pub id: String,
    pub name: String,
    pub unit_id: String,
    pub controlled: bool,
    pub track_stock: bool,
    pub on_hand: f64,
    pub active: bool,
}

impl From<StockItem> for FfiStockItem {
    fn from(item: StockItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            unit_id: item.unit_id,
            controlled: item.controlled,
            track_stock: item.track_stock,
            on_hand: item.on_hand,
            active: item.active,
        }
    }
}

impl From<FfiStockItem> for StockItem {
    fn from(item: FfiStockItem) -> Self {
        let mut stock_item = StockItem::new(item.id, item.name, item.unit_id);
        stock_item.controlled = item.controlled;
        stock_item.track_stock = item.track_stock;
        stock_item.on_hand = item.on_hand;
        stock_item.active = item.active;
        stock_item
    }
}

/// FFI-safe medication profile.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicationProfile {
    pub item_id: String,
    pub rate_unit: Option<String>,
    pub ampule_content: f64,
    pub administration_unit: String,
}

impl From<FfiMedicationProfile> for MedicationProfile {
    fn from(profile: FfiMedicationProfile) -> Self {
        MedicationProfile {
            item_id: profile.item_id,
            rate_unit: profile.rate_unit,
            ampule_content: profile.ampule_content,
            administration_unit: profile.administration_unit,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub name: String,
    pub weight_kg: Option<f64>,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            name: patient.name,
            weight_kg: patient.weight_kg,
        }
    }
}

/// FFI-safe administration event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdministrationEvent {
    pub id: String,
    pub record_id: String,
    pub item_id: String,
    pub kind: String,
    pub timestamp: String,
    pub end_timestamp: Option<String>,
    pub dose: Option<String>,
    pub rate: Option<String>,
    pub session_id: Option<String>,
}

impl From<AdministrationEvent> for FfiAdministrationEvent {
    fn from(event: AdministrationEvent) -> Self {
        Self {
            id: event.id,
            record_id: event.record_id,
            item_id: event.item_id,
            kind: event.kind.as_str().to_string(),
            timestamp: event.timestamp,
            end_timestamp: event.end_timestamp,
            dose: event.dose,
            rate: event.rate,
            session_id: event.session_id,
        }
    }
}

/// FFI-safe usage record with the resolved quantity precomputed.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUsageRecord {
    pub id: String,
    pub record_id: String,
    pub item_id: String,
    pub calculated_qty: f64,
    pub override_qty: Option<f64>,
    pub override_reason: Option<String>,
    pub overridden_by: Option<String>,
    pub effective_qty: f64,
    pub is_overridden: bool,
}

impl From<UsageRecord> for FfiUsageRecord {
    fn from(usage: UsageRecord) -> Self {
        let effective_qty = usage.effective_qty();
        let is_overridden = usage.has_override();
        Self {
            id: usage.id,
            record_id: usage.record_id,
            item_id: usage.item_id,
            calculated_qty: usage.calculated_qty,
            override_qty: usage.override_qty,
            override_reason: usage.override_reason,
            overridden_by: usage.overridden_by,
            effective_qty,
            is_overridden,
        }
    }
}

/// FFI-safe commit item line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCommitItem {
    pub item_id: String,
    pub item_name: String,
    pub quantity: f64,
    pub controlled: bool,
}

impl From<CommitItem> for FfiCommitItem {
    fn from(item: CommitItem) -> Self {
        Self {
            item_id: item.item_id,
            item_name: item.item_name,
            quantity: item.quantity,
            controlled: item.controlled,
        }
    }
}

/// FFI-safe commit record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCommitRecord {
    pub id: String,
    pub record_id: String,
    pub unit_id: String,
    pub committed_by: String,
    pub signature: Option<String>,
    pub items: Vec<FfiCommitItem>,
    pub snapshot_hash: String,
    pub committed_at: String,
    pub rolled_back_at: Option<String>,
    pub rolled_back_by: Option<String>,
    pub rollback_reason: Option<String>,
}

impl From<CommitRecord> for FfiCommitRecord {
    fn from(commit: CommitRecord) -> Self {
        Self {
            id: commit.id,
            record_id: commit.record_id,
            unit_id: commit.unit_id,
            committed_by: commit.committed_by,
            signature: commit.signature,
            items: commit.items.into_iter().map(|i| i.into()).collect(),
            snapshot_hash: commit.snapshot_hash,
            committed_at: commit.committed_at,
            rolled_back_at: commit.rolled_back_at,
            rolled_back_by: commit.rolled_back_by,
            rollback_reason: commit.rollback_reason,
        }
    }
}

/// FFI-safe audit entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAuditEntry {
    pub id: i64,
    pub record_type: String,
    pub record_id: String,
    pub action: String,
    pub user_id: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub timestamp: String,
}

impl From<AuditEntry> for FfiAuditEntry {
    fn from(entry: AuditEntry) -> Self {
        Self {
            id: entry.id,
            record_type: entry.record_type,
            record_id: entry.record_id,
            action: entry.action.as_str().to_string(),
            user_id: entry.user_id,
            old_value: entry.old_value,
            new_value: entry.new_value,
            reason: entry.reason,
            timestamp: entry.timestamp,
        }
    }
}
