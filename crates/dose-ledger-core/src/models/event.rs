//! Administration event models.

use serde::{Deserialize, Serialize};

/// Kind of administration event on the timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// Single discrete dose
    Bolus,
    /// Infusion session opens
    InfusionStart,
    /// Infusion session closes
    InfusionStop,
    /// Mid-session rate change
    RateChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Bolus => "bolus",
            EventKind::InfusionStart => "infusion_start",
            EventKind::InfusionStop => "infusion_stop",
            EventKind::RateChange => "rate_change",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bolus" => Some(EventKind::Bolus),
            "infusion_start" => Some(EventKind::InfusionStart),
            "infusion_stop" => Some(EventKind::InfusionStop),
            "rate_change" => Some(EventKind::RateChange),
            _ => None,
        }
    }
}

/// One entry on a record's medication-administration timeline.
///
/// Dose and rate are stored as free-form text; malformed values degrade
/// to a zero contribution at aggregation time instead of failing the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdministrationEvent {
    /// Unique event ID
    pub id: String,
    /// Owning clinical record
    pub record_id: String,
    /// Administered stock item
    pub item_id: String,
    /// Event kind
    pub kind: EventKind,
    /// Event timestamp (RFC 3339)
    pub timestamp: String,
    /// Embedded end timestamp (alternative to an explicit stop event)
    pub end_timestamp: Option<String>,
    /// Dose magnitude for bolus events, in the profile's administration unit
    pub dose: Option<String>,
    /// Rate for start/rate-change events, in the profile's rate unit
    pub rate: Option<String>,
    /// Explicit session link; absent on legacy events
    pub session_id: Option<String>,
    /// Creation timestamp
    pub created_at: String,
}

impl AdministrationEvent {
    /// Create a new event with required fields.
    pub fn new(record_id: String, item_id: String, kind: EventKind, timestamp: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            record_id,
            item_id,
            kind,
            timestamp,
            end_timestamp: None,
            dose: None,
            rate: None,
            session_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a bolus event.
    pub fn bolus(record_id: String, item_id: String, timestamp: String, dose: &str) -> Self {
        let mut event = Self::new(record_id, item_id, EventKind::Bolus, timestamp);
        event.dose = Some(dose.to_string());
        event
    }

    /// Create an infusion start event.
    pub fn infusion_start(
        record_id: String,
        item_id: String,
        timestamp: String,
        rate: Option<&str>,
        session_id: Option<&str>,
    ) -> Self {
        let mut event = Self::new(record_id, item_id, EventKind::InfusionStart, timestamp);
        event.rate = rate.map(str::to_string);
        event.session_id = session_id.map(str::to_string);
        event
    }

    /// Create an infusion stop event.
    pub fn infusion_stop(
        record_id: String,
        item_id: String,
        timestamp: String,
        session_id: Option<&str>,
    ) -> Self {
        let mut event = Self::new(record_id, item_id, EventKind::InfusionStop, timestamp);
        event.session_id = session_id.map(str::to_string);
        event
    }

    /// Create a rate change event.
    pub fn rate_change(
        record_id: String,
        item_id: String,
        timestamp: String,
        rate: &str,
        session_id: Option<&str>,
    ) -> Self {
        let mut event = Self::new(record_id, item_id, EventKind::RateChange, timestamp);
        event.rate = Some(rate.to_string());
        event.session_id = session_id.map(str::to_string);
        event
    }

    /// Parse the dose field, if present and well-formed.
    pub fn parsed_dose(&self) -> Option<f64> {
        parse_numeric(self.dose.as_deref())
    }

    /// Parse the rate field, if present and well-formed.
    pub fn parsed_rate(&self) -> Option<f64> {
        parse_numeric(self.rate.as_deref())
    }
}

/// Parse a free-form numeric field. Rejects non-finite and negative values.
fn parse_numeric(s: Option<&str>) -> Option<f64> {
    let value: f64 = s?.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}
