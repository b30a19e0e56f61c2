//! Signal-to-range model.

use serde::{Deserialize, Serialize};

use super::reading::Reading;
use crate::core::PresenceState;

/// Log-distance path loss model with an in-range threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeModel {
    /// Expected RSSI at one metre, in dBm.
    pub tx_power: i32,
    /// Path loss exponent; 2.0 is free space.
    pub path_loss_n: f64,
    /// Beacons at or below this distance are in range.
    pub threshold_m: f64,
}

impl Default for RangeModel {
    fn default() -> Self {
        Self {
            tx_power: -59,
            path_loss_n: 2.0,
            threshold_m: 3.0,
        }
    }
}

/// Distance and verdict derived from one reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeEstimate {
    pub distance_m: f64,
    pub state: PresenceState,
}

impl RangeModel {
    /// `10 ^ ((tx_power - rssi) / (10 * n))`
    pub fn distance_from_rssi(&self, rssi: i32) -> f64 {
        let exponent = f64::from(self.tx_power - rssi) / (10.0 * self.path_loss_n);
        10f64.powf(exponent)
    }

    pub fn verdict(&self, distance_m: f64) -> PresenceState {
        if distance_m <= self.threshold_m {
            PresenceState::In
        } else {
            PresenceState::Out
        }
    }

    /// Range verdict for a reading: the reported distance if present,
    /// otherwise one derived from RSSI. `None` for a bare sighting.
    pub fn estimate(&self, reading: &Reading) -> Option<RangeEstimate> {
        let distance_m = reading
            .distance_m
            .or_else(|| reading.rssi.map(|rssi| self.distance_from_rssi(rssi)))?;
        Some(RangeEstimate {
            distance_m,
            state: self.verdict(distance_m),
        })
    }
}
