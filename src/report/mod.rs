//! Read-side reporting over the presence stores.
//!
//! Everything here is derived from durable rows and the notification log;
//! nothing is cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::{BeaconStatus, DeviceStatus, Notification, NotificationKind, PresenceTimeline, PresenceWindow};
use crate::store::{NotificationFilter, PresenceStore, StoreError};

/// Per-subject activity over an optional window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub subject: String,
    pub total: usize,
    /// Entry count for every kind, in declaration order.
    pub counts: Vec<(NotificationKind, usize)>,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
    pub presence: Option<PresenceWindow>,
}

impl ActivitySummary {
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, count)| *count)
    }
}

/// Everything one gateway device has carried over an optional window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceActivity {
    pub device: String,
    pub status: Option<DeviceStatus>,
    /// `device_offline` entries for the device inside the window.
    pub offline_events: usize,
    /// One summary per beacon, ordered by key.
    pub beacons: Vec<ActivitySummary>,
}

/// Query facade for dashboards and reports.
pub struct Reporter<S> {
    store: S,
}

impl<S: PresenceStore> Reporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Log entries in insertion order.
    pub fn list_notifications(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, StoreError> {
        self.store.notifications(filter)
    }

    /// Total entries matching `filter`, for pagination.
    pub fn count_notifications(&self, filter: &NotificationFilter) -> Result<usize, StoreError> {
        self.store.count_notifications(filter)
    }

    /// In/out split for one beacon. Bounds default to its first and last
    /// boundary event; `None` when there is nothing to integrate.
    pub fn presence_window(
        &self,
        beacon_key: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<PresenceWindow>, StoreError> {
        let mut filter = NotificationFilter::new()
            .subject(beacon_key)
            .kinds(&[NotificationKind::In, NotificationKind::Left]);
        if let Some(end) = end {
            filter = filter.until(end);
        }
        let markers = self.store.notifications(&filter)?;
        Ok(PresenceTimeline::from_notifications(&markers).window(start, end))
    }

    pub fn current_state(&self, beacon_key: &str) -> Result<Option<BeaconStatus>, StoreError> {
        Ok(self.store.beacon(beacon_key)?.map(|b| b.status()))
    }

    pub fn current_device_state(&self, device_id: &str) -> Result<Option<DeviceStatus>, StoreError> {
        Ok(self.store.device(device_id)?.map(|d| d.status()))
    }

    /// Counts and presence for one subject over an optional window.
    pub fn activity_summary(
        &self,
        subject: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<ActivitySummary, StoreError> {
        let mut filter = NotificationFilter::new().subject(subject);
        if let Some(start) = start {
            filter = filter.since(start);
        }
        if let Some(end) = end {
            filter = filter.until(end);
        }
        let entries = self.store.notifications(&filter)?;

        let counts = NotificationKind::ALL
            .iter()
            .map(|kind| (*kind, entries.iter().filter(|n| n.kind == *kind).count()))
            .collect();

        Ok(ActivitySummary {
            subject: subject.to_string(),
            total: entries.len(),
            counts,
            first_event: entries.iter().map(|n| n.event_time).min(),
            last_event: entries.iter().map(|n| n.event_time).max(),
            presence: self.presence_window(subject, start, end)?,
        })
    }

    /// Activity of every beacon a device carries now or reported inside
    /// the window. Reversed bounds are swapped.
    pub fn device_activity(
        &self,
        device_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DeviceActivity, StoreError> {
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) if e < s => (Some(e), Some(s)),
            bounds => bounds,
        };

        let mut filter = NotificationFilter::new().device(device_id);
        if let Some(start) = start {
            filter = filter.since(start);
        }
        if let Some(end) = end {
            filter = filter.until(end);
        }
        let entries = self.store.notifications(&filter)?;

        let offline_events = entries
            .iter()
            .filter(|n| n.kind == NotificationKind::DeviceOffline && n.subject == device_id)
            .count();
        let mut keys: BTreeSet<String> = entries
            .into_iter()
            .filter(|n| n.kind != NotificationKind::DeviceOffline)
            .map(|n| n.subject)
            .collect();
        keys.extend(
            self.store
                .beacons()?
                .into_iter()
                .filter(|b| b.owning_device.as_deref() == Some(device_id))
                .map(|b| b.key),
        );

        let beacons = keys
            .iter()
            .map(|key| self.activity_summary(key, start, end))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DeviceActivity {
            device: device_id.to_string(),
            status: self.current_device_state(device_id)?,
            offline_events,
            beacons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PresenceState;
    use crate::store::{BoundaryReport, MemoryStore};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded() -> Reporter<MemoryStore> {
        let store = MemoryStore::new();
        store.touch_device("dev-1", t(0)).unwrap();
        for (state, secs) in [
            (PresenceState::In, 0),
            (PresenceState::Out, 3600),
            (PresenceState::In, 5400),
        ] {
            store
                .apply_boundary(&BoundaryReport::new("b-1", state, t(secs)).via("dev-1"))
                .unwrap();
        }
        Reporter::new(store)
    }

    #[test]
    fn presence_window_over_explicit_bounds() {
        let reporter = seeded();
        let window = reporter
            .presence_window("b-1", Some(t(0)), Some(t(7200)))
            .unwrap()
            .unwrap();

        assert_eq!(window.in_seconds, 3600 + 1800);
        assert_eq!(window.out_seconds, 1800);
        assert_eq!(window.in_percent, 75.0);
    }

    #[test]
    fn unknown_beacon_has_no_presence_data() {
        let reporter = seeded();
        assert!(reporter.presence_window("b-9", None, None).unwrap().is_none());
        assert!(reporter.current_state("b-9").unwrap().is_none());
    }

    #[test]
    fn current_states() {
        let reporter = seeded();

        let beacon = reporter.current_state("b-1").unwrap().unwrap();
        assert_eq!(beacon.state, PresenceState::In);
        assert_eq!(beacon.last_change_ts, t(5400));
        assert!(beacon.active);

        let device = reporter.current_device_state("dev-1").unwrap().unwrap();
        assert!(device.online);
        assert_eq!(device.last_seen_ts, t(0));
    }

    #[test]
    fn activity_summary_counts_kinds() {
        let reporter = seeded();
        let summary = reporter.activity_summary("b-1", None, None).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(NotificationKind::In), 2);
        assert_eq!(summary.count(NotificationKind::Left), 1);
        assert_eq!(summary.count(NotificationKind::StillIn), 0);
        assert_eq!(summary.first_event, Some(t(0)));
        assert_eq!(summary.last_event, Some(t(5400)));
        assert!(summary.presence.is_some());
    }

    #[test]
    fn device_activity_covers_carried_beacons() {
        let store = MemoryStore::new();
        store.touch_device("dev-1", t(0)).unwrap();
        store.touch_device("dev-2", t(0)).unwrap();
        for (key, device, state, secs) in [
            ("b-1", "dev-1", PresenceState::In, 0),
            ("b-2", "dev-2", PresenceState::In, 0),
            ("b-1", "dev-1", PresenceState::Out, 3600),
            ("b-3", "dev-1", PresenceState::In, 3000),
            ("b-3", "dev-2", PresenceState::In, 3500),
        ] {
            store
                .apply_boundary(&BoundaryReport::new(key, state, t(secs)).via(device))
                .unwrap();
        }
        store
            .demote_device("dev-1", t(6000), chrono::Duration::seconds(1200))
            .unwrap();
        let reporter = Reporter::new(store);

        let activity = reporter
            .device_activity("dev-1", Some(t(7200)), Some(t(0)))
            .unwrap();

        assert_eq!(activity.device, "dev-1");
        assert_eq!(activity.status.map(|s| s.online), Some(false));
        assert_eq!(activity.offline_events, 1);
        let keys: Vec<_> = activity.beacons.iter().map(|b| b.subject.as_str()).collect();
        assert_eq!(keys, vec!["b-1", "b-3"]);

        let b1 = &activity.beacons[0];
        assert_eq!(b1.count(NotificationKind::In), 1);
        assert_eq!(b1.count(NotificationKind::Left), 1);
        assert_eq!(b1.presence.as_ref().map(|p| p.in_percent), Some(50.0));
        assert_eq!(activity.beacons[1].total, 2);
    }

    #[test]
    fn device_without_history_has_empty_activity() {
        let reporter = seeded();
        let activity = reporter.device_activity("dev-9", None, None).unwrap();

        assert!(activity.status.is_none());
        assert!(activity.beacons.is_empty());
        assert_eq!(activity.offline_events, 0);
    }

    #[test]
    fn listing_and_count_agree() {
        let reporter = seeded();
        let filter = NotificationFilter::new().subject("b-1").page(2, 0);

        assert_eq!(reporter.list_notifications(&filter).unwrap().len(), 2);
        assert_eq!(reporter.count_notifications(&filter).unwrap(), 3);
    }
}
