//! SQLite schema definition.

/// Complete database schema for dose-ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Stock Items
-- ============================================================================

CREATE TABLE IF NOT EXISTS stock_items (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    unit_id TEXT NOT NULL,                        -- home unit that owns this stock
    controlled INTEGER NOT NULL DEFAULT 0,
    track_stock INTEGER NOT NULL DEFAULT 0,
    on_hand REAL NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_items_unit ON stock_items(unit_id);

-- ============================================================================
-- Medication Profiles (administration semantics per item)
-- ============================================================================

CREATE TABLE IF NOT EXISTS medication_profiles (
    item_id TEXT PRIMARY KEY REFERENCES stock_items(id),
    rate_unit TEXT,                               -- NULL = bolus, 'free' = free-flow
    ampule_content REAL NOT NULL DEFAULT 1,
    administration_unit TEXT NOT NULL DEFAULT 'mg',
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Patients and Clinical Records
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    weight_kg REAL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS clinical_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_records_patient ON clinical_records(patient_id);

-- ============================================================================
-- Administration Events (append-mostly timeline; edits audited)
-- ============================================================================

CREATE TABLE IF NOT EXISTS administration_events (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL REFERENCES clinical_records(id),
    item_id TEXT NOT NULL REFERENCES stock_items(id),
    kind TEXT NOT NULL CHECK (kind IN ('bolus', 'infusion_start', 'infusion_stop', 'rate_change')),
    timestamp TEXT NOT NULL,
    end_timestamp TEXT,
    dose TEXT,                                    -- free-form numeric, parsed at aggregation
    rate TEXT,                                    -- free-form numeric, parsed at aggregation
    session_id TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_events_record ON administration_events(record_id);
CREATE INDEX IF NOT EXISTS idx_events_record_item ON administration_events(record_id, item_id);

-- ============================================================================
-- Usage Records (derived state, recomputed idempotently)
-- ============================================================================

CREATE TABLE IF NOT EXISTS usage_records (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL REFERENCES clinical_records(id),
    item_id TEXT NOT NULL REFERENCES stock_items(id),
    calculated_qty REAL NOT NULL DEFAULT 0,
    override_qty REAL,
    override_reason TEXT,
    overridden_by TEXT,
    overridden_at TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (record_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_usage_record ON usage_records(record_id);

-- ============================================================================
-- Commit Records (append-only ledger; rollback fields are the only mutation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS commit_records (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL REFERENCES clinical_records(id),
    unit_id TEXT NOT NULL,
    committed_by TEXT NOT NULL,
    signature TEXT,
    items TEXT NOT NULL,                          -- JSON array of CommitItem (value snapshot)
    snapshot_hash TEXT NOT NULL,                  -- SHA-256 of canonical items JSON
    committed_at TEXT NOT NULL,
    rolled_back_at TEXT,
    rolled_back_by TEXT,
    rollback_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_commits_record ON commit_records(record_id);
CREATE INDEX IF NOT EXISTS idx_commits_unit ON commit_records(unit_id);

-- Commits are never deleted
CREATE TRIGGER IF NOT EXISTS commit_records_no_delete BEFORE DELETE ON commit_records
BEGIN
    SELECT RAISE(ABORT, 'Commit records are append-only');
END;

-- ============================================================================
-- Audit Log (append-only, never mutated)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_type TEXT NOT NULL,
    record_id TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('update', 'delete', 'commit', 'rollback')),
    user_id TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    reason TEXT,
    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_audit_record ON audit_log(record_type, record_id);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit entries are immutable');
END;
"#;
