//! Medication profile models.
//!
//! A profile describes how an item is administered: as discrete boluses,
//! as a free-flow infusion counted per container, or as a rate-controlled
//! infusion whose rate unit may be weight-normalized.

use serde::{Deserialize, Serialize};

/// Per-item administration semantics. Read-only from the engine's side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationProfile {
    /// The stock item this profile describes
    pub item_id: String,
    /// Rate unit: absent = bolus, "free" = free-flow, otherwise a
    /// rate-controlled unit such as "mcg/kg/min" or "mg/h"
    pub rate_unit: Option<String>,
    /// Content of one ampule/container in `administration_unit`
    pub ampule_content: f64,
    /// Unit doses and totals are expressed in (e.g. "mg", "ml")
    pub administration_unit: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// Administration mode, classified from the profile's rate unit.
#[derive(Debug, Clone, PartialEq)]
pub enum AdministrationMode {
    /// Discrete doses; summed then converted to ampules once
    Bolus,
    /// Uncontrolled infusion; one container per start event
    FreeFlow,
    /// Infusion integrated over piecewise-constant rate segments
    RateControlled(RateUnit),
}

/// A parsed rate unit of the form `mass[/kg]/time`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateUnit {
    /// Mass or volume component (e.g. "mcg", "mg", "ml")
    pub mass_unit: String,
    /// Whether the rate is normalized by patient weight
    pub per_kg: bool,
    /// Minutes represented by the time component (1 for /min, 60 for /h)
    pub time_minutes: f64,
}

impl RateUnit {
    /// Parse a rate unit string such as "mcg/kg/min" or "mg/h".
    ///
    /// Returns `None` for strings that do not follow the
    /// `mass[/kg]/time` shape; callers degrade such profiles to a zero
    /// contribution rather than failing.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        let (mass, per_kg, time) = match parts.as_slice() {
            [mass, time] => (*mass, false, *time),
            [mass, kg, time] if kg.eq_ignore_ascii_case("kg") => (*mass, true, *time),
            _ => return None,
        };

        if mass.is_empty() {
            return None;
        }

        let time_minutes = match time.to_lowercase().as_str() {
            "min" | "minute" => 1.0,
            "h" | "hr" | "hour" => 60.0,
            _ => return None,
        };

        Some(Self {
            mass_unit: mass.to_lowercase(),
            per_kg,
            time_minutes,
        })
    }
}

impl MedicationProfile {
    /// Create a bolus profile (no rate unit).
    pub fn bolus(item_id: String, ampule_content: f64, administration_unit: String) -> Self {
        Self {
            item_id,
            rate_unit: None,
            ampule_content,
            administration_unit,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create an infusion profile with the given rate unit.
    pub fn infusion(
        item_id: String,
        rate_unit: String,
        ampule_content: f64,
        administration_unit: String,
    ) -> Self {
        Self {
            item_id,
            rate_unit: Some(rate_unit),
            ampule_content,
            administration_unit,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Classify the administration mode from the rate unit.
    ///
    /// An unparseable rate unit classifies as rate-controlled with no
    /// usable unit and is reported as `None` by [`Self::rate_unit_parsed`];
    /// the aggregator warns and contributes zero for such items.
    pub fn mode(&self) -> AdministrationMode {
        match self.rate_unit.as_deref() {
            None => AdministrationMode::Bolus,
            Some(u) if u.eq_ignore_ascii_case("free") => AdministrationMode::FreeFlow,
            Some(u) => AdministrationMode::RateControlled(RateUnit::parse(u).unwrap_or(RateUnit {
                mass_unit: String::new(),
                per_kg: false,
                time_minutes: 1.0,
            })),
        }
    }

    /// Parse the rate unit, if this is a rate-controlled profile.
    pub fn rate_unit_parsed(&self) -> Option<RateUnit> {
        match self.rate_unit.as_deref() {
            None => None,
            Some(u) if u.eq_ignore_ascii_case("free") => None,
            Some(u) => RateUnit::parse(u),
        }
    }

    /// Ampule content guarded against zero/negative values.
    pub fn safe_ampule_content(&self) -> f64 {
        if self.ampule_content > 0.0 {
            self.ampule_content
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weight_normalized_rate() {
        let unit = RateUnit::parse("mcg/kg/min").unwrap();
        assert_eq!(unit.mass_unit, "mcg");
        assert!(unit.per_kg);
        assert_eq!(unit.time_minutes, 1.0);
    }

    #[test]
    fn test_parse_hourly_rate() {
        let unit = RateUnit::parse("mg/h").unwrap();
        assert_eq!(unit.mass_unit, "mg");
        assert!(!unit.per_kg);
        assert_eq!(unit.time_minutes, 60.0);

        let unit = RateUnit::parse("ml/hr").unwrap();
        assert_eq!(unit.mass_unit, "ml");
        assert_eq!(unit.time_minutes, 60.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RateUnit::parse("").is_none());
        assert!(RateUnit::parse("mg").is_none());
        assert!(RateUnit::parse("mg/kg/fortnight").is_none());
        assert!(RateUnit::parse("/kg/min").is_none());
    }

    #[test]
    fn test_mode_classification() {
        let bolus = MedicationProfile::bolus("i1".into(), 50.0, "mg".into());
        assert_eq!(bolus.mode(), AdministrationMode::Bolus);

        let free = MedicationProfile::infusion("i2".into(), "free".into(), 500.0, "ml".into());
        assert_eq!(free.mode(), AdministrationMode::FreeFlow);

        let rate = MedicationProfile::infusion("i3".into(), "mcg/kg/min".into(), 200.0, "mg".into());
        assert!(matches!(rate.mode(), AdministrationMode::RateControlled(_)));
        assert!(rate.rate_unit_parsed().is_some());
    }

    #[test]
    fn test_safe_ampule_content() {
        let mut profile = MedicationProfile::bolus("i1".into(), 50.0, "mg".into());
        assert_eq!(profile.safe_ampule_content(), 50.0);

        profile.ampule_content = 0.0;
        assert_eq!(profile.safe_ampule_content(), 1.0);

        profile.ampule_content = -3.0;
        assert_eq!(profile.safe_ampule_content(), 1.0);
    }
}
