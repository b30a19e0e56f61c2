//! Rows held by the presence stores and the notification log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{Liveness, PresenceState};
use crate::label_enum;

label_enum! {
    /// Kind of entry in the notification log.
    pub enum NotificationKind {
        In => "in",
        Left => "left",
        StillIn => "still_in",
        StillOut => "still_out",
        DeviceOffline => "device_offline",
    }
}

impl NotificationKind {
    /// Transition kind reported when a beacon enters `state`.
    pub fn transition(state: PresenceState) -> Self {
        match state {
            PresenceState::In => Self::In,
            PresenceState::Out => Self::Left,
        }
    }

    /// Heartbeat kind confirming an unchanged `state`.
    pub fn heartbeat(state: PresenceState) -> Self {
        match state {
            PresenceState::In => Self::StillIn,
            PresenceState::Out => Self::StillOut,
        }
    }

    /// Beacon state asserted by an `in`/`left` entry.
    pub fn presence(&self) -> Option<PresenceState> {
        match self {
            Self::In => Some(PresenceState::In),
            Self::Left => Some(PresenceState::Out),
            _ => None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::StillIn | Self::StillOut)
    }
}

/// A gateway device, keyed by its telemetry identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub online: bool,
    pub last_seen_ts: DateTime<Utc>,
    pub last_change_ts: DateTime<Utc>,
    pub last_online_ts: DateTime<Utc>,
    pub last_offline_ts: Option<DateTime<Utc>>,
}

impl Device {
    /// A device seen for the first time at `at`.
    pub fn first_seen(id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            online: true,
            last_seen_ts: at,
            last_change_ts: at,
            last_online_ts: at,
            last_offline_ts: None,
        }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::from(self.online)
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            online: self.online,
            last_seen_ts: self.last_seen_ts,
        }
    }
}

/// A beacon and what is currently believed about it.
///
/// `active == false` means the carrying device went dark, so presence is
/// unknown; it is not the same as `state == Out`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub key: String,
    pub state: PresenceState,
    pub last_change_ts: DateTime<Utc>,
    pub last_still_ts: Option<DateTime<Utc>>,
    pub owning_device: Option<String>,
    pub last_seen_ts: DateTime<Utc>,
    pub active: bool,
}

impl Beacon {
    /// A beacon first reported in `state` at `at`.
    pub fn first_seen(
        key: &str,
        state: PresenceState,
        device: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.to_string(),
            state,
            last_change_ts: at,
            last_still_ts: None,
            owning_device: device.map(str::to_string),
            last_seen_ts: at,
            active: true,
        }
    }

    pub fn status(&self) -> BeaconStatus {
        BeaconStatus {
            state: self.state,
            last_change_ts: self.last_change_ts,
            active: self.active,
        }
    }
}

/// Read-side view of a beacon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconStatus {
    pub state: PresenceState,
    pub last_change_ts: DateTime<Utc>,
    pub active: bool,
}

/// Read-side view of a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub online: bool,
    pub last_seen_ts: DateTime<Utc>,
}

/// An entry in the append-only notification log.
///
/// `id` is the insertion sequence and defines canonical event order.
/// `event_time` is when the underlying fact happened; `created_at` is when
/// the entry was written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub kind: NotificationKind,
    pub subject: String,
    pub device: Option<String>,
    pub distance_m: Option<f64>,
    pub event_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A notification about to be appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub subject: String,
    pub device: Option<String>,
    pub distance_m: Option<f64>,
    pub event_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn new(
        kind: NotificationKind,
        subject: &str,
        event_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            device: None,
            distance_m: None,
            event_time,
            created_at,
        }
    }

    pub fn with_device(mut self, device: Option<&str>) -> Self {
        self.device = device.map(str::to_string);
        self
    }

    pub fn with_distance(mut self, distance_m: Option<f64>) -> Self {
        self.distance_m = distance_m;
        self
    }

    /// Attach the log sequence number assigned by the store.
    pub fn into_recorded(self, id: i64) -> Notification {
        Notification {
            id,
            kind: self.kind,
            subject: self.subject,
            device: self.device,
            distance_m: self.distance_m,
            event_time: self.event_time,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn notification_kind_mapping() {
        assert_eq!(
            NotificationKind::transition(PresenceState::In),
            NotificationKind::In
        );
        assert_eq!(
            NotificationKind::transition(PresenceState::Out),
            NotificationKind::Left
        );
        assert_eq!(
            NotificationKind::heartbeat(PresenceState::Out),
            NotificationKind::StillOut
        );
        assert_eq!(NotificationKind::Left.presence(), Some(PresenceState::Out));
        assert_eq!(NotificationKind::StillIn.presence(), None);
        assert!(NotificationKind::StillIn.is_heartbeat());
        assert!(!NotificationKind::DeviceOffline.is_heartbeat());
    }

    #[test]
    fn notification_kind_labels_round_trip_through_storage_form() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.as_str().parse::<NotificationKind>(), Ok(*kind));
        }
    }

    #[test]
    fn first_seen_device_is_online() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let device = Device::first_seen("dev-1", at);

        assert!(device.online);
        assert_eq!(device.liveness(), Liveness::Online);
        assert_eq!(device.last_online_ts, at);
        assert!(device.last_offline_ts.is_none());
        assert_eq!(
            device.status(),
            DeviceStatus {
                online: true,
                last_seen_ts: at
            }
        );
    }

    #[test]
    fn first_seen_beacon_is_active() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let beacon = Beacon::first_seen("b-1", PresenceState::In, Some("dev-1"), at);

        assert!(beacon.active);
        assert_eq!(beacon.owning_device.as_deref(), Some("dev-1"));
        assert_eq!(beacon.status().state, PresenceState::In);
        assert!(beacon.last_still_ts.is_none());
    }

    #[test]
    fn new_notification_builder() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let recorded = NewNotification::new(NotificationKind::In, "b-1", at, at)
            .with_device(Some("dev-1"))
            .with_distance(Some(1.5))
            .into_recorded(7);

        assert_eq!(recorded.id, 7);
        assert_eq!(recorded.device.as_deref(), Some("dev-1"));
        assert_eq!(recorded.distance_m, Some(1.5));
    }
}
