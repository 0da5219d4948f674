//! Usage aggregation engine.
//!
//! Derives per-item consumable quantities from a record's
//! medication-administration timeline, windowed by the commit ledger:
//! only events after an item's last non-rolled-back commit count. The
//! derivation is a pure function of (timeline, commits, profiles,
//! patient weight), so re-running it is always safe and concurrent
//! viewers converge to the same result.

mod sessions;

pub use sessions::*;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::{Database, DbResult};
use crate::models::{
    AdministrationEvent, AdministrationMode, EventKind, MedicationProfile, UsageRecord,
};

/// Quantities below this are treated as zero usage.
const EPSILON: f64 = 1e-9;

/// The usage aggregation engine.
pub struct UsageAggregator<'a> {
    db: &'a Database,
}

impl<'a> UsageAggregator<'a> {
    /// Create a new aggregator over the given database.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Recompute usage for a record and reconcile its usage rows.
    ///
    /// Rows carrying an override are left untouched; rows whose window
    /// now yields zero and which carry no override are deleted.
    pub fn recalculate(&self, record_id: &str) -> DbResult<Vec<UsageRecord>> {
        let quantities = self.compute_quantities(record_id, Utc::now())?;
        let existing = self.db.list_usage_for_record(record_id)?;
        let overridden: Vec<&str> = existing
            .iter()
            .filter(|row| row.has_override())
            .map(|row| row.item_id.as_str())
            .collect();

        for (item_id, qty) in &quantities {
            if *qty <= EPSILON || overridden.contains(&item_id.as_str()) {
                continue;
            }
            self.db.upsert_calculated_usage(record_id, item_id, *qty)?;
        }

        for row in &existing {
            if row.has_override() {
                continue;
            }
            let qty = quantities.get(&row.item_id).copied().unwrap_or(0.0);
            if qty <= EPSILON {
                self.db.delete_usage_record(record_id, &row.item_id)?;
            }
        }

        self.db.list_usage_for_record(record_id)
    }

    /// Derive per-item quantities without touching stored usage rows.
    pub fn compute_quantities(
        &self,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<HashMap<String, f64>> {
        let events = self.db.list_events_for_record(record_id)?;
        let commits = self.db.list_active_commits(record_id)?;
        let weight = self.db.record_patient_weight(record_id)?;

        // Last commit time per item is recomputed from the ledger on
        // every call, never cached.
        let mut last_commit: HashMap<String, DateTime<Utc>> = HashMap::new();
        for commit in &commits {
            let at = match parse_ts(&commit.committed_at) {
                Some(at) => at,
                None => {
                    warn!(commit_id = %commit.id, "malformed commit timestamp ignored");
                    continue;
                }
            };
            for item in &commit.items {
                last_commit
                    .entry(item.item_id.clone())
                    .and_modify(|t| *t = (*t).max(at))
                    .or_insert(at);
            }
        }

        let mut per_item: HashMap<String, Vec<AdministrationEvent>> = HashMap::new();
        for event in events {
            per_item.entry(event.item_id.clone()).or_default().push(event);
        }

        let mut quantities = HashMap::new();
        for (item_id, item_events) in per_item {
            let profile = match self.db.get_profile(&item_id)? {
                Some(profile) => profile,
                None => {
                    warn!(item_id = %item_id, "no medication profile, item skipped");
                    continue;
                }
            };

            let window_start = last_commit.get(&item_id).copied();
            let windowed: Vec<AdministrationEvent> = item_events
                .into_iter()
                .filter(|event| match parse_ts(&event.timestamp) {
                    Some(ts) => window_start.map_or(true, |w| ts > w),
                    None => {
                        warn!(item_id = %item_id, event_id = %event.id, "malformed event timestamp, event skipped");
                        false
                    }
                })
                .collect();

            let qty = quantity_for_item(&profile, &windowed, weight, now);
            debug!(record_id, item_id = %item_id, qty, "derived item usage");
            quantities.insert(item_id, qty);
        }
        Ok(quantities)
    }

    /// Whether the record has any infusion session still running.
    pub fn has_open_sessions(&self, record_id: &str) -> DbResult<bool> {
        let events = self.db.list_events_for_record(record_id)?;

        let mut per_item: HashMap<String, Vec<AdministrationEvent>> = HashMap::new();
        for event in events {
            per_item.entry(event.item_id.clone()).or_default().push(event);
        }

        for (item_id, item_events) in per_item {
            let profile = match self.db.get_profile(&item_id)? {
                Some(profile) => profile,
                None => continue,
            };
            if matches!(profile.mode(), AdministrationMode::Bolus) {
                continue;
            }
            if reconstruct_sessions(&item_id, &item_events)
                .iter()
                .any(InfusionSession::is_open)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Refresh every record with an open infusion session. Intended to
    /// be driven by the host on a fixed interval so live infusions keep
    /// accruing even without a viewer. Returns the number of records
    /// refreshed.
    pub fn sweep_open_records(&self) -> DbResult<usize> {
        let mut refreshed = 0;
        for record_id in self.db.list_record_ids()? {
            if self.has_open_sessions(&record_id)? {
                self.recalculate(&record_id)?;
                refreshed += 1;
            }
        }
        debug!(refreshed, "open infusion sweep complete");
        Ok(refreshed)
    }
}

/// Derive the consumable quantity for one item from its windowed,
/// chronological event list.
pub fn quantity_for_item(
    profile: &MedicationProfile,
    events: &[AdministrationEvent],
    patient_weight_kg: Option<f64>,
    now: DateTime<Utc>,
) -> f64 {
    match profile.mode() {
        AdministrationMode::Bolus => {
            // Sum before rounding: per-event rounding overcounts.
            let total = bolus_sum(profile, events);
            to_ampules(total, profile)
        }
        AdministrationMode::FreeFlow => {
            // One container per start; rate values are ignored.
            events
                .iter()
                .filter(|e| e.kind == EventKind::InfusionStart)
                .count() as f64
        }
        AdministrationMode::RateControlled(unit) => {
            let mut total = bolus_sum(profile, events);

            if unit.mass_unit.is_empty() {
                warn!(
                    item_id = %profile.item_id,
                    rate_unit = ?profile.rate_unit,
                    "unparseable rate unit, infusions contribute zero"
                );
                return to_ampules(total, profile);
            }

            let weight = if unit.per_kg {
                match patient_weight_kg {
                    Some(w) if w > 0.0 => Some(w),
                    _ => {
                        warn!(
                            item_id = %profile.item_id,
                            "weight-normalized rate without patient weight, infusions contribute zero"
                        );
                        None
                    }
                }
            } else {
                Some(1.0)
            };

            if let Some(weight) = weight {
                let mut infused = 0.0;
                for session in reconstruct_sessions(&profile.item_id, events) {
                    for segment in session.segments(now) {
                        infused +=
                            segment.rate * weight * segment.duration_minutes() / unit.time_minutes;
                    }
                }

                total += match convert_amount(infused, &unit.mass_unit, &profile.administration_unit)
                {
                    Some(converted) => converted,
                    None => {
                        warn!(
                            item_id = %profile.item_id,
                            from = %unit.mass_unit,
                            to = %profile.administration_unit,
                            "no unit conversion, amount passed through unscaled"
                        );
                        infused
                    }
                };
            }

            to_ampules(total, profile)
        }
    }
}

/// Sum bolus dose magnitudes, degrading malformed doses to zero.
fn bolus_sum(profile: &MedicationProfile, events: &[AdministrationEvent]) -> f64 {
    let mut total = 0.0;
    for event in events.iter().filter(|e| e.kind == EventKind::Bolus) {
        match event.parsed_dose() {
            Some(dose) => total += dose,
            None => {
                warn!(
                    item_id = %profile.item_id,
                    event_id = %event.id,
                    "malformed bolus dose, zero contribution"
                );
            }
        }
    }
    total
}

/// Convert a total administered amount into whole ampules, once per item.
fn to_ampules(total: f64, profile: &MedicationProfile) -> f64 {
    if total <= EPSILON {
        return 0.0;
    }
    (total / profile.safe_ampule_content()).ceil()
}

/// Convert an amount between units of the same dimension.
///
/// Returns `None` when the units are not convertible (unknown unit or
/// mass/volume mismatch).
pub fn convert_amount(amount: f64, from: &str, to: &str) -> Option<f64> {
    if from.eq_ignore_ascii_case(to) {
        return Some(amount);
    }
    let (from_canon, from_factor) = unit_factor(from)?;
    let (to_canon, to_factor) = unit_factor(to)?;
    if from_canon != to_canon {
        return None;
    }
    Some(amount * from_factor / to_factor)
}

fn unit_factor(unit: &str) -> Option<(&'static str, f64)> {
    match unit.to_lowercase().as_str() {
        "mcg" | "ug" | "µg" => Some(("mg", 0.001)),
        "mg" => Some(("mg", 1.0)),
        "g" => Some(("mg", 1000.0)),
        "ml" => Some(("ml", 1.0)),
        "l" => Some(("ml", 1000.0)),
        "unit" | "units" | "iu" => Some(("units", 1.0)),
        _ => None,
    }
}
