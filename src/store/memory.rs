//! In-process presence store.
//!
//! All three tables sit behind one mutex, so every method is a single
//! critical section. Used for tests and for embedding without a database.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{
    apply, paginate, BoundaryOutcome, BoundaryReport, NotificationFilter, PresenceStore,
    StoreError, TouchOutcome,
};
use crate::core::{Beacon, Device, NewNotification, Notification, Thresholds};

#[derive(Default)]
struct Tables {
    devices: BTreeMap<String, Device>,
    beacons: BTreeMap<String, Beacon>,
    log: Vec<Notification>,
}

impl Tables {
    fn append(&mut self, notification: NewNotification) -> Notification {
        let id = self.log.last().map_or(1, |last| last.id + 1);
        let recorded = notification.into_recorded(id);
        self.log.push(recorded.clone());
        recorded
    }

    fn carrier_online(&self, beacon: &Beacon) -> bool {
        let carrier = beacon
            .owning_device
            .as_ref()
            .and_then(|id| self.devices.get(id));
        apply::carrier_online(beacon, carrier)
    }

    /// Run a beacon rule and commit its result.
    fn evaluate<F>(&mut self, key: &str, rule: F) -> Option<Notification>
    where
        F: FnOnce(&Beacon, bool) -> Option<(Beacon, NewNotification)>,
    {
        let beacon = self.beacons.get(key)?;
        let carrier_online = self.carrier_online(beacon);
        let (updated, notification) = rule(beacon, carrier_online)?;
        self.beacons.insert(key.to_string(), updated);
        Some(self.append(notification))
    }
}

/// Presence store held in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceStore for MemoryStore {
    fn touch_device(&self, id: &str, at: DateTime<Utc>) -> Result<TouchOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let existing = tables.devices.get(id).cloned();
        let (device, outcome) = apply::touch(existing, id, at);
        tables.devices.insert(id.to_string(), device);
        Ok(outcome)
    }

    fn device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.tables.lock().devices.get(id).cloned())
    }

    fn devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.tables.lock().devices.values().cloned().collect())
    }

    fn demote_device(
        &self,
        id: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        let mut tables = self.tables.lock();
        let Some((demoted, notification)) = tables
            .devices
            .get(id)
            .and_then(|device| apply::demote(device, now, threshold))
        else {
            return Ok(None);
        };

        tables.devices.insert(id.to_string(), demoted);
        for beacon in tables.beacons.values_mut() {
            if beacon.owning_device.as_deref() == Some(id) {
                beacon.active = false;
            }
        }
        Ok(Some(tables.append(notification)))
    }

    fn observe_beacon(
        &self,
        key: &str,
        device: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(beacon) = tables.beacons.remove(key) else {
            return Ok(false);
        };
        let refreshed = apply::sighted(beacon, Some(device), at);
        tables.beacons.insert(key.to_string(), refreshed);
        Ok(true)
    }

    fn apply_boundary(&self, report: &BoundaryReport) -> Result<BoundaryOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let existing = tables.beacons.get(&report.key).cloned();
        let (beacon, notification, change) = apply::boundary(existing, report);
        tables.beacons.insert(report.key.clone(), beacon);
        let notification = tables.append(notification);
        Ok(BoundaryOutcome {
            notification,
            change,
        })
    }

    fn deactivate_beacon(&self, key: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(beacon) = tables.beacons.get(key) else {
            return Ok(false);
        };
        let Some(dark) = apply::darken(beacon, tables.carrier_online(beacon)) else {
            return Ok(false);
        };
        tables.beacons.insert(key.to_string(), dark);
        Ok(true)
    }

    fn beacon(&self, key: &str) -> Result<Option<Beacon>, StoreError> {
        Ok(self.tables.lock().beacons.get(key).cloned())
    }

    fn beacons(&self) -> Result<Vec<Beacon>, StoreError> {
        Ok(self.tables.lock().beacons.values().cloned().collect())
    }

    fn expire_beacon(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .tables
            .lock()
            .evaluate(key, |beacon, online| apply::expire(beacon, online, now, thresholds)))
    }

    fn record_heartbeat(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(self
            .tables
            .lock()
            .evaluate(key, |beacon, online| apply::heartbeat(beacon, online, now, thresholds)))
    }

    fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, StoreError> {
        let tables = self.tables.lock();
        let selected = tables.log.iter().filter(|n| filter.matches(n)).cloned();
        Ok(paginate(selected, filter))
    }

    fn count_notifications(&self, filter: &NotificationFilter) -> Result<usize, StoreError> {
        Ok(self
            .tables
            .lock()
            .log
            .iter()
            .filter(|n| filter.matches(n))
            .count())
    }
}
