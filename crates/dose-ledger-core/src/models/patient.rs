//! Patient and clinical record models.

use serde::{Deserialize, Serialize};

/// A patient profile, consumed read-only for weight-normalized rates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Unique patient ID
    pub id: String,
    /// Patient name
    pub name: String,
    /// Weight in kg (required for /kg rate units)
    pub weight_kg: Option<f64>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(name: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            weight_kg: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Thin anchor linking a clinical record to its patient.
///
/// Record CRUD proper lives outside this crate; events, usage and
/// commits all hang off the record ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalRecord {
    pub id: String,
    pub patient_id: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_patient() {
        let patient = Patient::new("Doe, Jane".into());
        assert_eq!(patient.name, "Doe, Jane");
        assert!(patient.weight_kg.is_none());
        assert_eq!(patient.id.len(), 36); // UUID format
    }
}
