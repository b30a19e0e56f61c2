//! Latest telemetry per device, for live views.
//!
//! The cache is bounded in both size and age. It is a convenience for
//! readers that want the raw last batch; presence decisions never read it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::reading::Reading;

/// The last batch received from one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub readings: Vec<Reading>,
    pub received_at: DateTime<Utc>,
}

/// Bounded, expiring map from device id to its latest snapshot.
pub struct SnapshotCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, DeviceSnapshot>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(1024, Duration::seconds(900))
    }
}

impl SnapshotCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a snapshot, evicting expired entries and then the oldest one
    /// if the cache is full.
    pub fn insert(&self, snapshot: DeviceSnapshot, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        entries.retain(|_, s| now - s.received_at <= self.ttl);

        if !entries.contains_key(&snapshot.device_id) && entries.len() >= self.capacity {
            let oldest = entries
                .values()
                .min_by_key(|s| s.received_at)
                .map(|s| s.device_id.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(snapshot.device_id.clone(), snapshot);
    }

    /// Latest snapshot for a device, unless it has expired.
    pub fn get(&self, device_id: &str, now: DateTime<Utc>) -> Option<DeviceSnapshot> {
        self.entries
            .lock()
            .get(device_id)
            .filter(|s| now - s.received_at <= self.ttl)
            .cloned()
    }

    /// Every live snapshot, ordered by device id.
    pub fn live(&self, now: DateTime<Utc>) -> Vec<DeviceSnapshot> {
        let mut live: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|s| now - s.received_at <= self.ttl)
            .cloned()
            .collect();
        live.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        live
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
