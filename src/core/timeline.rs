//! Presence timelines and windowed occupancy.
//!
//! A timeline is the ordered list of `in`/`left` markers for one beacon.
//! Integrating it over a window yields how long the beacon was in and out
//! of range. Like the rest of the core, timelines are immutable values:
//! `record` returns a new timeline.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::record::{Notification, NotificationKind};
use super::state::{PresenceState, State};

/// One boundary marker: the beacon entered `state` at `at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMark {
    pub state: PresenceState,
    pub at: DateTime<Utc>,
}

/// In/out time for one beacon over a window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceWindow {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub in_seconds: i64,
    pub out_seconds: i64,
    pub in_percent: f64,
    pub out_percent: f64,
}

/// Ordered `in`/`left` markers for one beacon, in insertion order.
///
/// # Example
///
/// ```rust
/// use beaconward::core::{PresenceMark, PresenceState, PresenceTimeline};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
/// let timeline = PresenceTimeline::new()
///     .record(PresenceMark { state: PresenceState::In, at: t0 })
///     .record(PresenceMark { state: PresenceState::Out, at: t0 + Duration::hours(1) });
///
/// let window = timeline
///     .window(Some(t0), Some(t0 + Duration::hours(2)))
///     .unwrap();
/// assert_eq!(window.in_seconds, 3600);
/// assert_eq!(window.out_seconds, 3600);
/// assert_eq!(window.in_percent, 50.0);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceTimeline {
    marks: Vec<PresenceMark>,
}

impl PresenceTimeline {
    pub fn new() -> Self {
        Self { marks: Vec::new() }
    }

    /// Record a marker, returning a new timeline.
    pub fn record(&self, mark: PresenceMark) -> Self {
        let mut marks = self.marks.clone();
        marks.push(mark);
        Self { marks }
    }

    /// Build a timeline from log entries, keeping only `in` and `left`.
    pub fn from_notifications<'a, I>(notifications: I) -> Self
    where
        I: IntoIterator<Item = &'a Notification>,
    {
        let marks = notifications
            .into_iter()
            .filter_map(|n| {
                n.kind.presence().map(|state| PresenceMark {
                    state,
                    at: n.event_time,
                })
            })
            .collect();
        Self { marks }
    }

    /// Build a timeline from raw `(type, timestamp)` pairs.
    ///
    /// Pairs whose type is not `in`/`left`, or whose timestamp does not
    /// parse, are discarded.
    pub fn from_raw<I, K, T>(events: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: AsRef<str>,
        T: AsRef<str>,
    {
        let marks = events
            .into_iter()
            .filter_map(|(kind, ts)| {
                let state = kind
                    .as_ref()
                    .trim()
                    .parse::<NotificationKind>()
                    .ok()?
                    .presence()?;
                let at = parse_timestamp(ts.as_ref())?;
                Some(PresenceMark { state, at })
            })
            .collect();
        Self { marks }
    }

    pub fn marks(&self) -> &[PresenceMark] {
        &self.marks
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// Earliest and latest marker time.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.marks.iter().map(|m| m.at).min()?;
        let last = self.marks.iter().map(|m| m.at).max()?;
        Some((first, last))
    }

    /// Integrate in/out time over `[start, end]`.
    ///
    /// Bounds default to the first and last marker. The beacon is assumed
    /// out at `start`; markers outside the window are ignored. Returns
    /// `None` when there are no markers, the window is empty or inverted,
    /// or nothing accumulated.
    pub fn window(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<PresenceWindow> {
        let (first, last) = self.span()?;
        let start = start.unwrap_or(first);
        let end = end.unwrap_or(last);
        if end <= start {
            return None;
        }

        // Stable: markers sharing a timestamp keep insertion order.
        let mut ordered: Vec<&PresenceMark> = self.marks.iter().collect();
        ordered.sort_by_key(|m| m.at);

        let mut state = PresenceState::absent();
        let mut cursor = start;
        let mut in_seconds = 0i64;
        let mut out_seconds = 0i64;

        let mut accumulate = |state: PresenceState, from: DateTime<Utc>, to: DateTime<Utc>| {
            let elapsed = (to - from).num_seconds().max(0);
            if state.is_present() {
                in_seconds += elapsed;
            } else {
                out_seconds += elapsed;
            }
        };

        for mark in ordered
            .into_iter()
            .filter(|m| m.at >= start && m.at <= end)
        {
            accumulate(state, cursor, mark.at);
            state = mark.state;
            cursor = mark.at;
        }
        accumulate(state, cursor, end);

        let total = in_seconds + out_seconds;
        if total <= 0 {
            return None;
        }

        Some(PresenceWindow {
            window_start: start,
            window_end: end,
            in_seconds,
            out_seconds,
            in_percent: percent(in_seconds, total),
            out_percent: percent(out_seconds, total),
        })
    }
}

fn percent(part: i64, total: i64) -> f64 {
    (part as f64 * 1000.0 / total as f64).round() / 10.0
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and the naive `YYYY-MM-DD HH:MM:SS` form (with either a
/// space or `T` separator), read as UTC. Fractional seconds on the naive
/// form are ignored.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let normalized = raw.replacen('T', " ", 1);
    let head = normalized.get(..19)?;
    let naive = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn mark(state: PresenceState, secs: i64) -> PresenceMark {
        PresenceMark { state, at: t(secs) }
    }

    #[test]
    fn new_timeline_is_empty() {
        let timeline = PresenceTimeline::new();
        assert!(timeline.is_empty());
        assert!(timeline.span().is_none());
        assert!(timeline.window(Some(t(0)), Some(t(10))).is_none());
    }

    #[test]
    fn record_is_immutable() {
        let timeline = PresenceTimeline::new();
        let next = timeline.record(mark(PresenceState::In, 0));

        assert_eq!(timeline.marks().len(), 0);
        assert_eq!(next.marks().len(), 1);
    }

    #[test]
    fn half_in_half_out() {
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::Out, 3600));

        let w = timeline.window(Some(t(0)), Some(t(7200))).unwrap();
        assert_eq!(w.in_seconds, 3600);
        assert_eq!(w.out_seconds, 3600);
        assert_eq!(w.in_percent, 50.0);
        assert_eq!(w.out_percent, 50.0);
    }

    #[test]
    fn assumes_out_at_window_start() {
        let timeline = PresenceTimeline::new().record(mark(PresenceState::In, 600));

        let w = timeline.window(Some(t(0)), Some(t(1200))).unwrap();
        assert_eq!(w.out_seconds, 600);
        assert_eq!(w.in_seconds, 600);
    }

    #[test]
    fn markers_before_window_are_not_back_inferred() {
        // The beacon went in before the window opened; the window still
        // starts out.
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, -100))
            .record(mark(PresenceState::Out, 300));

        let w = timeline.window(Some(t(0)), Some(t(600))).unwrap();
        assert_eq!(w.in_seconds, 0);
        assert_eq!(w.out_seconds, 600);
        assert_eq!(w.in_percent, 0.0);
        assert_eq!(w.out_percent, 100.0);
    }

    #[test]
    fn markers_after_window_are_ignored() {
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::Out, 5000));

        let w = timeline.window(Some(t(0)), Some(t(1000))).unwrap();
        assert_eq!(w.in_seconds, 1000);
        assert_eq!(w.out_seconds, 0);
        assert_eq!(w.in_percent, 100.0);
    }

    #[test]
    fn default_window_spans_markers() {
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::Out, 900))
            .record(mark(PresenceState::In, 1200));

        let w = timeline.window(None, None).unwrap();
        assert_eq!(w.window_start, t(0));
        assert_eq!(w.window_end, t(1200));
        assert_eq!(w.in_seconds, 900);
        assert_eq!(w.out_seconds, 300);
        assert_eq!(w.in_percent, 75.0);
        assert_eq!(w.out_percent, 25.0);
    }

    #[test]
    fn invalid_or_empty_windows_report_no_data() {
        let single = PresenceTimeline::new().record(mark(PresenceState::In, 0));
        assert!(single.window(None, None).is_none());

        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::Out, 100));
        assert!(timeline.window(Some(t(100)), Some(t(100))).is_none());
        assert!(timeline.window(Some(t(100)), Some(t(0))).is_none());
    }

    #[test]
    fn markers_are_walked_in_time_order() {
        // A TTL departure is logged after later sightings but carries the
        // earlier last-seen time.
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::In, 600))
            .record(mark(PresenceState::Out, 300));

        let w = timeline.window(Some(t(0)), Some(t(1200))).unwrap();
        assert_eq!(w.in_seconds, 300 + 600);
        assert_eq!(w.out_seconds, 300);
    }

    #[test]
    fn percentages_round_to_one_decimal() {
        let timeline = PresenceTimeline::new().record(mark(PresenceState::In, 1));

        let w = timeline.window(Some(t(0)), Some(t(3))).unwrap();
        assert_eq!(w.in_percent, 66.7);
        assert_eq!(w.out_percent, 33.3);
    }

    #[test]
    fn from_raw_discards_unparsable_and_foreign_entries() {
        let timeline = PresenceTimeline::from_raw(vec![
            ("in", "2024-03-01 08:00:00"),
            ("still_in", "2024-03-01 08:30:00"),
            ("left", "not a time"),
            ("left", "2024-03-01T09:00:00"),
            ("bogus", "2024-03-01 09:30:00"),
            ("in", "2024-03-01T10:00:00+13:00"),
        ]);

        assert_eq!(timeline.marks().len(), 3);
        assert_eq!(timeline.marks()[0].state, PresenceState::In);
        assert_eq!(timeline.marks()[1].state, PresenceState::Out);
        assert_eq!(
            timeline.marks()[2].at,
            Utc.with_ymd_and_hms(2024, 2, 29, 21, 0, 0).unwrap()
        );
    }

    #[test]
    fn from_notifications_keeps_transitions_only() {
        let base = |id, kind| Notification {
            id,
            kind,
            subject: "b-1".to_string(),
            device: None,
            distance_m: None,
            event_time: t(id * 10),
            created_at: t(id * 10),
        };
        let log = vec![
            base(1, NotificationKind::In),
            base(2, NotificationKind::StillIn),
            base(3, NotificationKind::Left),
            base(4, NotificationKind::DeviceOffline),
        ];

        let timeline = PresenceTimeline::from_notifications(&log);
        assert_eq!(timeline.marks().len(), 2);
        assert_eq!(timeline.span(), Some((t(10), t(30))));
    }

    #[test]
    fn parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2024-03-01 08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T08:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp(" 2024-03-01 08:00:00.250 "), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2024-03-01"), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn window_serializes_correctly() {
        let timeline = PresenceTimeline::new()
            .record(mark(PresenceState::In, 0))
            .record(mark(PresenceState::Out, 60));
        let w = timeline.window(None, Some(t(0) + Duration::seconds(120))).unwrap();

        let json = serde_json::to_string(&w).unwrap();
        let back: PresenceWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
