//! Presence storage.
//!
//! The device liveness store, the beacon presence store and the
//! notification log live behind one trait so that every write which touches
//! more than one of them commits as a unit. Each mutating method re-checks
//! its condition inside the same atomic section that applies it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::{
    Beacon, Device, Liveness, Notification, NotificationKind, PresenceState, StateChange,
    Thresholds,
};

mod apply;
pub mod error;
mod memory;
mod retry;
pub mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use sqlite::SqliteStore;

/// Result of a telemetry receipt.
#[derive(Clone, Debug, PartialEq)]
pub enum TouchOutcome {
    /// The device was unknown or offline and is now online.
    CameOnline(StateChange<Liveness>),
    /// The device was already online; only its last sighting moved.
    Refreshed,
}

/// A direct range verdict for one beacon.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryReport {
    pub key: String,
    pub device: Option<String>,
    pub state: PresenceState,
    pub at: DateTime<Utc>,
    pub distance_m: Option<f64>,
}

impl BoundaryReport {
    pub fn new(key: &str, state: PresenceState, at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            device: None,
            state,
            at,
            distance_m: None,
        }
    }

    /// Carrier that measured the beacon.
    pub fn via(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    pub fn at_distance(mut self, distance_m: f64) -> Self {
        self.distance_m = Some(distance_m);
        self
    }
}

/// What a boundary report did.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundaryOutcome {
    /// The audit entry, appended for every report.
    pub notification: Notification,
    /// Set when the stored state moved (or the beacon was created).
    pub change: Option<StateChange<PresenceState>>,
}

/// Selection over the notification log.
///
/// Empty `kinds` selects every kind. `device` selects entries recorded
/// through one carrier. The time bounds are inclusive and apply to
/// `event_time`. `search` is a case-insensitive substring match over
/// subject and kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub kinds: Vec<NotificationKind>,
    pub subject: Option<String>,
    pub device: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl NotificationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: NotificationKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn kinds(mut self, kinds: &[NotificationKind]) -> Self {
        self.kinds.extend_from_slice(kinds);
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn search(mut self, needle: &str) -> Self {
        let needle = needle.trim();
        self.search = (!needle.is_empty()).then(|| needle.to_ascii_lowercase());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// The same selection without pagination.
    pub fn unpaged(&self) -> Self {
        Self {
            limit: None,
            offset: 0,
            ..self.clone()
        }
    }

    /// Whether an entry is selected, ignoring pagination.
    pub fn matches(&self, notification: &Notification) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&notification.kind) {
            return false;
        }
        if self
            .subject
            .as_deref()
            .is_some_and(|subject| subject != notification.subject)
        {
            return false;
        }
        if self
            .device
            .as_deref()
            .is_some_and(|device| notification.device.as_deref() != Some(device))
        {
            return false;
        }
        if self.since.is_some_and(|since| notification.event_time < since) {
            return false;
        }
        if self.until.is_some_and(|until| notification.event_time > until) {
            return false;
        }
        match self.search.as_deref() {
            Some(needle) => {
                notification.subject.to_ascii_lowercase().contains(needle)
                    || notification.kind.as_str().contains(needle)
            }
            None => true,
        }
    }
}

/// Storage for device liveness, beacon presence and the notification log.
///
/// Mutations are atomic conditional upserts: each one re-evaluates its
/// precondition against the row as it is at write time and does nothing
/// if the precondition no longer holds. Callers may therefore act on stale
/// reads without double-applying a transition.
pub trait PresenceStore: Send + Sync {
    /// Record telemetry from a device, bringing it online if needed.
    fn touch_device(&self, id: &str, at: DateTime<Utc>) -> Result<TouchOutcome, StoreError>;

    fn device(&self, id: &str) -> Result<Option<Device>, StoreError>;

    fn devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Ids of every device currently online.
    fn online_devices(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.online)
            .map(|d| d.id)
            .collect())
    }

    /// Demote a device silent for longer than `threshold`.
    ///
    /// Sets it offline, appends one `device_offline` entry and deactivates
    /// every beacon it owns. Returns `None` if the device is unknown,
    /// already offline or no longer stale.
    fn demote_device(
        &self,
        id: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Option<Notification>, StoreError>;

    /// Refresh a known beacon seen without a range verdict.
    ///
    /// Returns `false` when the beacon is unknown.
    fn observe_beacon(&self, key: &str, device: &str, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Apply a boundary report: always append the audit entry, move the
    /// state only when it differs.
    fn apply_boundary(&self, report: &BoundaryReport) -> Result<BoundaryOutcome, StoreError>;

    /// Mark a beacon inactive if its carrier is offline or unknown.
    ///
    /// Returns `false` when the beacon is unknown, already inactive or its
    /// carrier is online.
    fn deactivate_beacon(&self, key: &str) -> Result<bool, StoreError>;

    fn beacon(&self, key: &str) -> Result<Option<Beacon>, StoreError>;

    fn beacons(&self) -> Result<Vec<Beacon>, StoreError>;

    /// Force a silent beacon out, if the TTL rule still holds at `now`.
    fn expire_beacon(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError>;

    /// Emit a heartbeat, if one is still due at `now`.
    fn record_heartbeat(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError>;

    /// Log entries selected by `filter`, in insertion order.
    fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, StoreError>;

    /// Number of log entries selected by `filter`, ignoring pagination.
    fn count_notifications(&self, filter: &NotificationFilter) -> Result<usize, StoreError>;
}

impl<S: PresenceStore + ?Sized> PresenceStore for std::sync::Arc<S> {
    fn touch_device(&self, id: &str, at: DateTime<Utc>) -> Result<TouchOutcome, StoreError> {
        (**self).touch_device(id, at)
    }

    fn device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        (**self).device(id)
    }

    fn devices(&self) -> Result<Vec<Device>, StoreError> {
        (**self).devices()
    }

    fn online_devices(&self) -> Result<HashSet<String>, StoreError> {
        (**self).online_devices()
    }

    fn demote_device(
        &self,
        id: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        (**self).demote_device(id, now, threshold)
    }

    fn observe_beacon(
        &self,
        key: &str,
        device: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).observe_beacon(key, device, at)
    }

    fn apply_boundary(&self, report: &BoundaryReport) -> Result<BoundaryOutcome, StoreError> {
        (**self).apply_boundary(report)
    }

    fn deactivate_beacon(&self, key: &str) -> Result<bool, StoreError> {
        (**self).deactivate_beacon(key)
    }

    fn beacon(&self, key: &str) -> Result<Option<Beacon>, StoreError> {
        (**self).beacon(key)
    }

    fn beacons(&self) -> Result<Vec<Beacon>, StoreError> {
        (**self).beacons()
    }

    fn expire_beacon(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        (**self).expire_beacon(key, now, thresholds)
    }

    fn record_heartbeat(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        (**self).record_heartbeat(key, now, thresholds)
    }

    fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, StoreError> {
        (**self).notifications(filter)
    }

    fn count_notifications(&self, filter: &NotificationFilter) -> Result<usize, StoreError> {
        (**self).count_notifications(filter)
    }
}

/// Apply pagination to entries already in insertion order.
fn paginate(entries: impl Iterator<Item = Notification>, filter: &NotificationFilter) -> Vec<Notification> {
    let entries = entries.skip(filter.offset);
    match filter.limit {
        Some(limit) => entries.take(limit).collect(),
        None => entries.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewNotification;
    use chrono::TimeZone;

    fn note(id: i64, kind: NotificationKind, subject: &str, secs: i64) -> Notification {
        let at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        NewNotification::new(kind, subject, at, at).into_recorded(id)
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = NotificationFilter::new();
        assert!(filter.matches(&note(1, NotificationKind::In, "b-1", 0)));
        assert!(filter.matches(&note(2, NotificationKind::DeviceOffline, "dev-1", 0)));
    }

    #[test]
    fn filter_by_kind_subject_and_time() {
        let t = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let filter = NotificationFilter::new()
            .kinds(&[NotificationKind::In, NotificationKind::Left])
            .subject("b-1")
            .since(t(10))
            .until(t(20));

        assert!(filter.matches(&note(1, NotificationKind::In, "b-1", 10)));
        assert!(filter.matches(&note(2, NotificationKind::Left, "b-1", 20)));
        assert!(!filter.matches(&note(3, NotificationKind::In, "b-1", 21)));
        assert!(!filter.matches(&note(4, NotificationKind::StillIn, "b-1", 15)));
        assert!(!filter.matches(&note(5, NotificationKind::In, "b-2", 15)));
    }

    #[test]
    fn search_is_case_insensitive_over_subject_and_kind() {
        let filter = NotificationFilter::new().search("  Dock ");
        assert!(filter.matches(&note(1, NotificationKind::In, "loading-DOCK-3", 0)));
        assert!(!filter.matches(&note(2, NotificationKind::In, "b-1", 0)));

        let filter = NotificationFilter::new().search("offline");
        assert!(filter.matches(&note(3, NotificationKind::DeviceOffline, "dev-1", 0)));

        let blank = NotificationFilter::new().search("   ");
        assert!(blank.search.is_none());
    }

    #[test]
    fn filter_by_carrying_device() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let via = |device: Option<&str>| {
            NewNotification::new(NotificationKind::In, "b-1", at, at)
                .with_device(device)
                .into_recorded(1)
        };
        let filter = NotificationFilter::new().device("dev-1");

        assert!(filter.matches(&via(Some("dev-1"))));
        assert!(!filter.matches(&via(Some("dev-2"))));
        assert!(!filter.matches(&via(None)));
    }

    #[test]
    fn pagination_skips_then_limits() {
        let log: Vec<_> = (1..=5)
            .map(|id| note(id, NotificationKind::StillIn, "b-1", id))
            .collect();
        let page = paginate(log.into_iter(), &NotificationFilter::new().page(2, 1));

        let ids: Vec<_> = page.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
