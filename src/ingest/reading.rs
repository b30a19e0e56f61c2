//! Beacon readings as relayed by a gateway.

use serde::{Deserialize, Serialize};

/// One beacon sighting inside a telemetry batch.
///
/// A reading carries a range measurement when it has an explicit distance
/// or an RSSI value; without either it is a bare sighting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub beacon_id: String,
    /// Received signal strength in dBm.
    #[serde(default)]
    pub rssi: Option<i32>,
    /// Distance reported by the gateway, in metres.
    #[serde(default)]
    pub distance_m: Option<f64>,
    /// When the gateway saw the beacon; the batch time when absent.
    #[serde(default)]
    pub seen_at: Option<String>,
}

impl Reading {
    /// A bare sighting.
    pub fn new(beacon_id: &str) -> Self {
        Self {
            beacon_id: beacon_id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_distance(beacon_id: &str, distance_m: f64) -> Self {
        Self {
            distance_m: Some(distance_m),
            ..Self::new(beacon_id)
        }
    }

    pub fn with_rssi(beacon_id: &str, rssi: i32) -> Self {
        Self {
            rssi: Some(rssi),
            ..Self::new(beacon_id)
        }
    }

    pub fn seen_at(mut self, timestamp: &str) -> Self {
        self.seen_at = Some(timestamp.to_string());
        self
    }
}
