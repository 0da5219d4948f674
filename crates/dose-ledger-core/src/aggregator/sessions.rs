//! Infusion session reconstruction.
//!
//! A session is one continuous infusion episode from start to stop,
//! possibly containing multiple constant-rate segments. Events carrying
//! an explicit session ID are grouped by it; events without one fall
//! back to positional chronological pairing, which assumes at most one
//! open session per item at a time.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{AdministrationEvent, EventKind};

/// A contiguous constant-rate stretch of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rate: f64,
}

impl RateSegment {
    /// Segment duration in minutes.
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }
}

/// One reconstructed infusion episode.
#[derive(Debug, Clone, PartialEq)]
pub struct InfusionSession {
    pub item_id: String,
    pub start: DateTime<Utc>,
    /// Absent while the infusion is still running
    pub end: Option<DateTime<Utc>>,
    /// Rate at session start
    pub initial_rate: f64,
    /// Mid-session rate changes, chronological
    pub rate_changes: Vec<(DateTime<Utc>, f64)>,
}

impl InfusionSession {
    /// Whether the session is still running (no stop, no embedded end).
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Split the session into constant-rate segments, integrating open
    /// sessions up to `now` so live infusions keep accruing.
    pub fn segments(&self, now: DateTime<Utc>) -> Vec<RateSegment> {
        let end = self.end.unwrap_or(now);
        if end <= self.start {
            return Vec::new();
        }

        let mut points: Vec<(DateTime<Utc>, f64)> = vec![(self.start, self.initial_rate)];
        for (at, rate) in &self.rate_changes {
            if *at <= self.start || *at >= end {
                warn!(
                    item_id = %self.item_id,
                    at = %at,
                    "rate change outside session bounds ignored"
                );
                continue;
            }
            points.push((*at, *rate));
        }

        let mut segments = Vec::with_capacity(points.len());
        for (i, (seg_start, rate)) in points.iter().enumerate() {
            let seg_end = points.get(i + 1).map(|(at, _)| *at).unwrap_or(end);
            segments.push(RateSegment {
                start: *seg_start,
                end: seg_end,
                rate: *rate,
            });
        }
        segments
    }
}

/// Parse an RFC 3339 timestamp, degrading to `None` on malformed input.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Default)]
struct SessionBuilder {
    start: Option<(DateTime<Utc>, f64)>,
    end: Option<DateTime<Utc>>,
    changes: Vec<(DateTime<Utc>, f64)>,
}

impl SessionBuilder {
    fn finish(self, item_id: &str) -> Option<InfusionSession> {
        let (start, initial_rate) = match self.start {
            Some(s) => s,
            None => {
                // Stop or rate change with no visible start (typically
                // masked by a prior commit window): zero contribution.
                warn!(item_id, "infusion events without a start event dropped");
                return None;
            }
        };

        let mut changes = self.changes;
        changes.sort_by_key(|(at, _)| *at);

        Some(InfusionSession {
            item_id: item_id.to_string(),
            start,
            end: self.end,
            initial_rate,
            rate_changes: changes,
        })
    }
}

/// Reconstruct infusion sessions for one item from its chronological
/// event list. Bolus events are ignored here.
pub fn reconstruct_sessions(item_id: &str, events: &[AdministrationEvent]) -> Vec<InfusionSession> {
    fn linked_builder(sid: &str, linked: &mut Vec<(String, SessionBuilder)>) -> usize {
        if let Some(pos) = linked.iter().position(|(s, _)| s == sid) {
            pos
        } else {
            linked.push((sid.to_string(), SessionBuilder::default()));
            linked.len() - 1
        }
    }

    let mut linked: Vec<(String, SessionBuilder)> = Vec::new();
    let mut open_unlinked: Vec<SessionBuilder> = Vec::new();
    let mut finished: Vec<SessionBuilder> = Vec::new();

    for event in events {
        let ts = match parse_ts(&event.timestamp) {
            Some(ts) => ts,
            None => {
                warn!(item_id, event_id = %event.id, "malformed event timestamp, event skipped");
                continue;
            }
        };

        match event.kind {
            EventKind::Bolus => {}
            EventKind::InfusionStart => {
                let rate = event.parsed_rate().unwrap_or_else(|| {
                    if event.rate.is_some() {
                        warn!(item_id, event_id = %event.id, "malformed rate on start, treated as zero");
                    }
                    0.0
                });
                let end = event
                    .end_timestamp
                    .as_deref()
                    .and_then(|s| {
                        let parsed = parse_ts(s);
                        if parsed.is_none() {
                            warn!(item_id, event_id = %event.id, "malformed end timestamp ignored");
                        }
                        parsed
                    });

                let builder = SessionBuilder {
                    start: Some((ts, rate)),
                    end,
                    changes: Vec::new(),
                };

                match &event.session_id {
                    Some(sid) => {
                        let idx = linked_builder(sid, &mut linked);
                        let existing = &mut linked[idx].1;
                        if existing.start.is_some() {
                            warn!(item_id, session_id = %sid, "duplicate start for session ignored");
                        } else {
                            existing.start = builder.start;
                            if existing.end.is_none() {
                                existing.end = builder.end;
                            }
                        }
                    }
                    None => {
                        if !open_unlinked.is_empty() {
                            // Positional pairing cannot disambiguate
                            // overlapping sessions; stops close FIFO.
                            warn!(item_id, "overlapping unlinked infusion sessions");
                        }
                        open_unlinked.push(builder);
                    }
                }
            }
            EventKind::RateChange => {
                let rate = event.parsed_rate().unwrap_or_else(|| {
                    warn!(item_id, event_id = %event.id, "malformed rate change, treated as zero");
                    0.0
                });

                match &event.session_id {
                    Some(sid) => {
                        let idx = linked_builder(sid, &mut linked);
                        linked[idx].1.changes.push((ts, rate));
                    }
                    None => match open_unlinked.last_mut() {
                        Some(builder) => builder.changes.push((ts, rate)),
                        None => {
                            warn!(item_id, event_id = %event.id, "rate change with no open session dropped");
                        }
                    },
                }
            }
            EventKind::InfusionStop => match &event.session_id {
                Some(sid) => {
                    let idx = linked_builder(sid, &mut linked);
                    linked[idx].1.end = Some(ts);
                }
                None => {
                    if open_unlinked.is_empty() {
                        warn!(item_id, event_id = %event.id, "stop with no open session dropped");
                    } else {
                        let mut builder = open_unlinked.remove(0);
                        builder.end = Some(ts);
                        finished.push(builder);
                    }
                }
            },
        }
    }

    let mut sessions: Vec<InfusionSession> = Vec::new();
    for (_, builder) in linked {
        sessions.extend(builder.finish(item_id));
    }
    for builder in finished.into_iter().chain(open_unlinked) {
        sessions.extend(builder.finish(item_id));
    }
    sessions.sort_by_key(|s| s.start);
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdministrationEvent;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    fn start(t: &str, rate: &str, sid: Option<&str>) -> AdministrationEvent {
        AdministrationEvent::infusion_start("r1".into(), "i1".into(), t.into(), Some(rate), sid)
    }

    fn stop(t: &str, sid: Option<&str>) -> AdministrationEvent {
        AdministrationEvent::infusion_stop("r1".into(), "i1".into(), t.into(), sid)
    }

    fn change(t: &str, rate: &str, sid: Option<&str>) -> AdministrationEvent {
        AdministrationEvent::rate_change("r1".into(), "i1".into(), t.into(), rate, sid)
    }

    #[test]
    fn test_linked_session_with_rate_change() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "5", Some("s1")),
            change("2024-05-01T08:30:00Z", "2.5", Some("s1")),
            stop("2024-05-01T09:00:00Z", Some("s1")),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        assert_eq!(sessions.len(), 1);

        let segments = sessions[0].segments(ts("2024-05-01T12:00:00Z"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].rate, 5.0);
        assert_eq!(segments[0].duration_minutes(), 30.0);
        assert_eq!(segments[1].rate, 2.5);
        assert_eq!(segments[1].duration_minutes(), 30.0);
    }

    #[test]
    fn test_embedded_end_timestamp() {
        let mut event = start("2024-05-01T08:00:00Z", "10", None);
        event.end_timestamp = Some("2024-05-01T08:45:00Z".into());

        let sessions = reconstruct_sessions("i1", &[event]);
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].is_open());

        let segments = sessions[0].segments(ts("2024-05-01T12:00:00Z"));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].duration_minutes(), 45.0);
    }

    #[test]
    fn test_open_session_integrates_to_now() {
        let events = vec![start("2024-05-01T08:00:00Z", "3", None)];

        let sessions = reconstruct_sessions("i1", &events);
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_open());

        let segments = sessions[0].segments(ts("2024-05-01T08:20:00Z"));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].duration_minutes(), 20.0);
    }

    #[test]
    fn test_legacy_positional_pairing() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "5", None),
            stop("2024-05-01T09:00:00Z", None),
            start("2024-05-01T10:00:00Z", "2", None),
            stop("2024-05-01T10:30:00Z", None),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].end, Some(ts("2024-05-01T09:00:00Z")));
        assert_eq!(sessions[1].end, Some(ts("2024-05-01T10:30:00Z")));
    }

    #[test]
    fn test_overlapping_unlinked_pairs_fifo() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "5", None),
            start("2024-05-01T08:10:00Z", "2", None),
            stop("2024-05-01T09:00:00Z", None),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        assert_eq!(sessions.len(), 2);

        // Oldest open session closes first; the other stays open
        let closed: Vec<_> = sessions.iter().filter(|s| !s.is_open()).collect();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].start, ts("2024-05-01T08:00:00Z"));
    }

    #[test]
    fn test_orphan_stop_dropped() {
        let events = vec![stop("2024-05-01T09:00:00Z", None)];
        let sessions = reconstruct_sessions("i1", &events);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_malformed_rate_degrades_to_zero() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "five", None),
            stop("2024-05-01T09:00:00Z", None),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].initial_rate, 0.0);
    }

    #[test]
    fn test_rate_change_outside_bounds_ignored() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "5", Some("s1")),
            change("2024-05-01T10:00:00Z", "9", Some("s1")), // after stop
            stop("2024-05-01T09:00:00Z", Some("s1")),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        let segments = sessions[0].segments(ts("2024-05-01T12:00:00Z"));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].rate, 5.0);
    }

    #[test]
    fn test_zero_duration_session_has_no_segments() {
        let events = vec![
            start("2024-05-01T08:00:00Z", "5", Some("s1")),
            stop("2024-05-01T08:00:00Z", Some("s1")),
        ];

        let sessions = reconstruct_sessions("i1", &events);
        assert!(sessions[0].segments(ts("2024-05-01T12:00:00Z")).is_empty());
    }
}
