//! Row transitions shared by every store.
//!
//! A store reads the current row inside its atomic section, asks one of
//! these functions what the row should become, and writes the answer back
//! together with any notification. Returning `None` means the condition no
//! longer holds and the write is a no-op.

use chrono::{DateTime, Duration, Utc};

use super::{BoundaryReport, TouchOutcome};
use crate::core::{
    stale_device, Beacon, BeaconRules, BeaconVerdict, Device, Liveness, NewNotification,
    NotificationKind, PresenceState, StateChange, Thresholds,
};

/// Row, audit entry and state change produced by a boundary report.
pub(crate) type BoundaryWrite = (Beacon, NewNotification, Option<StateChange<PresenceState>>);

/// Telemetry receipt: bring the device online or refresh its last sighting.
pub(crate) fn touch(existing: Option<Device>, id: &str, at: DateTime<Utc>) -> (Device, TouchOutcome) {
    match existing {
        None => (
            Device::first_seen(id, at),
            TouchOutcome::CameOnline(StateChange {
                from: None,
                to: Liveness::Online,
                at,
            }),
        ),
        Some(device) if !device.online => (
            Device {
                online: true,
                last_seen_ts: at,
                last_change_ts: at,
                last_online_ts: at,
                ..device
            },
            TouchOutcome::CameOnline(StateChange {
                from: Some(Liveness::Offline),
                to: Liveness::Online,
                at,
            }),
        ),
        Some(device) => (
            Device {
                last_seen_ts: device.last_seen_ts.max(at),
                ..device
            },
            TouchOutcome::Refreshed,
        ),
    }
}

/// Offline demotion, if the device is still online and stale at `now`.
pub(crate) fn demote(
    device: &Device,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Option<(Device, NewNotification)> {
    if !stale_device(now, threshold).check(device) {
        return None;
    }
    let demoted = Device {
        online: false,
        last_change_ts: now,
        last_offline_ts: Some(now),
        ..device.clone()
    };
    let notification = NewNotification::new(NotificationKind::DeviceOffline, &device.id, now, now)
        .with_device(Some(&device.id));
    Some((demoted, notification))
}

/// Direct range measurement. The row's state fields only move when the
/// verdict differs from the stored state and the report is not older than
/// the newest sighting; the sighting fields always move. `last_change_ts`
/// never moves backwards.
pub(crate) fn boundary(existing: Option<Beacon>, report: &BoundaryReport) -> BoundaryWrite {
    let notification = NewNotification::new(
        NotificationKind::transition(report.state),
        &report.key,
        report.at,
        report.at,
    )
    .with_device(report.device.as_deref())
    .with_distance(report.distance_m);

    let (beacon, change) = match existing {
        None => (
            Beacon::first_seen(&report.key, report.state, report.device.as_deref(), report.at),
            Some(StateChange {
                from: None,
                to: report.state,
                at: report.at,
            }),
        ),
        Some(beacon) if beacon.state != report.state && report.at >= beacon.last_seen_ts => {
            let change = StateChange {
                from: Some(beacon.state),
                to: report.state,
                at: report.at,
            };
            let moved = Beacon {
                state: report.state,
                last_change_ts: beacon.last_change_ts.max(report.at),
                last_still_ts: None,
                ..beacon
            };
            (sighted(moved, report.device.as_deref(), report.at), Some(change))
        }
        Some(beacon) => (sighted(beacon, report.device.as_deref(), report.at), None),
    };

    (beacon, notification, change)
}

/// Refresh the sighting fields of a beacon.
pub(crate) fn sighted(beacon: Beacon, device: Option<&str>, at: DateTime<Utc>) -> Beacon {
    Beacon {
        last_seen_ts: beacon.last_seen_ts.max(at),
        owning_device: device.map(str::to_string).or(beacon.owning_device),
        active: true,
        ..beacon
    }
}

/// Mark a beacon inactive when its carrier is offline or unknown.
pub(crate) fn darken(beacon: &Beacon, carrier_online: bool) -> Option<Beacon> {
    if carrier_online || !beacon.active {
        return None;
    }
    Some(Beacon {
        active: false,
        ..beacon.clone()
    })
}

/// TTL expiry, if the evaluator rules still call for it.
pub(crate) fn expire(
    beacon: &Beacon,
    carrier_online: bool,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Option<(Beacon, NewNotification)> {
    let BeaconVerdict::Expire { last_seen } =
        BeaconRules::at(now, thresholds).judge(beacon, carrier_online)
    else {
        return None;
    };
    let expired = Beacon {
        state: PresenceState::Out,
        last_change_ts: now,
        last_still_ts: None,
        ..beacon.clone()
    };
    let notification = NewNotification::new(NotificationKind::Left, &beacon.key, last_seen, now)
        .with_device(beacon.owning_device.as_deref());
    Some((expired, notification))
}

/// Heartbeat, if the evaluator rules still call for it.
pub(crate) fn heartbeat(
    beacon: &Beacon,
    carrier_online: bool,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Option<(Beacon, NewNotification)> {
    let BeaconVerdict::Heartbeat(kind) =
        BeaconRules::at(now, thresholds).judge(beacon, carrier_online)
    else {
        return None;
    };
    let stamped = Beacon {
        last_still_ts: Some(now),
        ..beacon.clone()
    };
    let notification = NewNotification::new(kind, &beacon.key, now, now)
        .with_device(beacon.owning_device.as_deref());
    Some((stamped, notification))
}

/// Whether a beacon's carrier counts as online. Beacons without a carrier
/// are always evaluated; an unknown carrier is treated as offline.
pub(crate) fn carrier_online(beacon: &Beacon, carrier: Option<&Device>) -> bool {
    match &beacon.owning_device {
        None => true,
        Some(_) => carrier.is_some_and(|d| d.online),
    }
}
