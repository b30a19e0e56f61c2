//! Pure evaluator rules.
//!
//! Every decision the evaluator makes is a function of a durably stored row,
//! the tick time and the configured thresholds. The stores re-run the same
//! rules inside their atomic writes, so a decision taken on a stale read is
//! simply a no-op when applied.

use chrono::{DateTime, Duration, Utc};

use super::guard::Guard;
use super::record::{Beacon, Device, NotificationKind};
use super::state::PresenceState;

/// Time limits that drive the evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    /// Beacon silence after which it is presumed out of range.
    pub ttl: Duration,
    /// Device silence after which it is demoted to offline.
    pub device_offline: Duration,
    /// Minimum spacing between heartbeats, and between a real transition
    /// and the first heartbeat.
    pub still_interval: Duration,
}

impl Thresholds {
    pub fn from_secs(ttl: i64, device_offline: i64, still_interval: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl),
            device_offline: Duration::seconds(device_offline),
            still_interval: Duration::seconds(still_interval),
        }
    }
}

/// What one tick should do with one beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BeaconVerdict {
    /// The carrying device is offline or unknown; nothing can be said.
    CarrierDark,
    /// Silent past the TTL while not out: force `out`, report the departure
    /// at the last real sighting.
    Expire { last_seen: DateTime<Utc> },
    /// Silent past the TTL and already out: nothing left to confirm.
    Silent,
    /// Emit a heartbeat confirming the current state.
    Heartbeat(NotificationKind),
    /// Too soon after a transition or the previous heartbeat.
    Throttled,
}

/// Beacon rules bound to one tick.
pub struct BeaconRules {
    silent: Guard<Beacon>,
    heartbeat_due: Guard<Beacon>,
}

impl BeaconRules {
    pub fn at(now: DateTime<Utc>, thresholds: &Thresholds) -> Self {
        let ttl = thresholds.ttl;
        let interval = thresholds.still_interval;

        let silent = Guard::new(move |b: &Beacon| now - b.last_seen_ts > ttl);
        let settled = Guard::new(move |b: &Beacon| now - b.last_change_ts >= interval);
        let quiet = Guard::new(move |b: &Beacon| {
            b.last_still_ts.map_or(true, |still| now - still >= interval)
        });

        Self {
            silent,
            heartbeat_due: settled.and(quiet),
        }
    }

    /// Evaluate one beacon, in strict priority order: carrier, TTL, heartbeat.
    ///
    /// Heartbeats are only reached while the beacon is within its TTL.
    pub fn judge(&self, beacon: &Beacon, carrier_online: bool) -> BeaconVerdict {
        if !carrier_online {
            return BeaconVerdict::CarrierDark;
        }
        if self.silent.check(beacon) {
            return match beacon.state {
                PresenceState::Out => BeaconVerdict::Silent,
                PresenceState::In => BeaconVerdict::Expire {
                    last_seen: beacon.last_seen_ts,
                },
            };
        }
        if self.heartbeat_due.check(beacon) {
            BeaconVerdict::Heartbeat(NotificationKind::heartbeat(beacon.state))
        } else {
            BeaconVerdict::Throttled
        }
    }
}

/// Guard that holds for online devices silent longer than `threshold`.
pub fn stale_device(now: DateTime<Utc>, threshold: Duration) -> Guard<Device> {
    Guard::new(move |d: &Device| d.online && now - d.last_seen_ts > threshold)
}
