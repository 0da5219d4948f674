//! Audit trail models.

use serde::{Deserialize, Serialize};

/// Audited action kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    Update,
    Delete,
    Commit,
    Rollback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Commit => "commit",
            AuditAction::Rollback => "rollback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "commit" => Some(AuditAction::Commit),
            "rollback" => Some(AuditAction::Rollback),
            _ => None,
        }
    }
}

/// One append-only compliance log entry.
///
/// Written alongside every mutation of a clinical sub-record and every
/// controlled-substance stock movement. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Row ID (assigned by the store)
    pub id: i64,
    /// Kind of record audited (e.g. "administration_event", "stock_item")
    pub record_type: String,
    /// ID of the audited record
    pub record_id: String,
    /// What happened
    pub action: AuditAction,
    /// Acting user
    pub user_id: String,
    /// State before the mutation (JSON), if applicable
    pub old_value: Option<String>,
    /// State after the mutation (JSON), if applicable
    pub new_value: Option<String>,
    /// Free-form reason, when one was given
    pub reason: Option<String>,
    /// Entry timestamp
    pub timestamp: String,
}
