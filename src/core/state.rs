//! Presence and liveness states.
//!
//! Both stores track a two-valued state per subject: beacons are in or out
//! of range, devices are online or offline. The `State` trait gives the
//! evaluator and the logs one vocabulary for both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::label_enum;

/// Trait for the two-valued states tracked per subject.
///
/// All methods are pure. States are small copyable values; the stores own
/// the timestamps that say when a state was entered.
pub trait State:
    Copy + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Label used in storage and logs.
    fn name(&self) -> &'static str;

    /// Whether this state asserts the subject is present.
    fn is_present(&self) -> bool;

    /// The state a subject falls back to once evidence runs out.
    fn absent() -> Self;
}

label_enum! {
    /// Range verdict for a beacon.
    pub enum PresenceState {
        In => "in",
        Out => "out",
    }
}

impl State for PresenceState {
    fn name(&self) -> &'static str {
        self.as_str()
    }

    fn is_present(&self) -> bool {
        matches!(self, Self::In)
    }

    fn absent() -> Self {
        Self::Out
    }
}

label_enum! {
    /// Liveness of a gateway device.
    pub enum Liveness {
        Online => "online",
        Offline => "offline",
    }
}

impl State for Liveness {
    fn name(&self) -> &'static str {
        self.as_str()
    }

    fn is_present(&self) -> bool {
        matches!(self, Self::Online)
    }

    fn absent() -> Self {
        Self::Offline
    }
}

impl From<bool> for Liveness {
    fn from(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Record of a single state change applied by a store.
///
/// `from` is `None` when the subject was unknown before the change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateChange<S: State> {
    pub from: Option<S>,
    pub to: S,
    pub at: DateTime<Utc>,
}

impl<S: State> StateChange<S> {
    /// True when the subject was first seen by this change.
    pub fn is_first_sighting(&self) -> bool {
        self.from.is_none()
    }

    /// True when the change moves an absent (or unknown) subject to present.
    pub fn is_arrival(&self) -> bool {
        self.to.is_present() && !self.from.is_some_and(|s| s.is_present())
    }
}
