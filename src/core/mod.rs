//! Core presence types and logic.
//!
//! This module contains the pure core of the presence state machine:
//! - State definitions via the `State` trait
//! - Store rows and notification log entries
//! - Guard predicates and the evaluator rules built from them
//! - Presence timelines and windowed occupancy
//!
//! All logic in this module is pure (no side effects). The stores and the
//! evaluator form the imperative shell around it.

mod guard;
mod macros;
mod record;
mod rules;
mod state;
mod timeline;

pub use guard::Guard;
pub use record::{
    Beacon, BeaconStatus, Device, DeviceStatus, NewNotification, Notification, NotificationKind,
};
pub use rules::{stale_device, BeaconRules, BeaconVerdict, Thresholds};
pub use state::{Liveness, PresenceState, State, StateChange};
pub use timeline::{parse_timestamp, PresenceMark, PresenceTimeline, PresenceWindow};

/// A stored label that matches no variant of a label enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label '{label}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}
