//! Telemetry ingestion.
//!
//! `Ingestor::record_seen` is the entry point for one telemetry batch from
//! one gateway. It refreshes the device's liveness, validates every reading,
//! turns range measurements into boundary reports and refreshes bare
//! sightings. It never fails towards the caller: faults are logged and
//! counted in the returned report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stillwater::validation::Validation;
use tracing::{debug, info, warn};

use crate::core::{parse_timestamp, PresenceState};
use crate::store::{BoundaryOutcome, BoundaryReport, PresenceStore, RetryPolicy, TouchOutcome};

mod range;
mod reading;
mod snapshot;
mod validate;

pub use range::{RangeEstimate, RangeModel};
pub use reading::Reading;
pub use snapshot::{DeviceSnapshot, SnapshotCache};
pub use validate::{validate_reading, ReadingViolation, RSSI_RANGE};

/// What one telemetry batch did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// The device was unknown or offline before this batch.
    pub came_online: bool,
    /// Readings that passed validation and were applied.
    pub accepted: usize,
    /// Readings rejected by validation.
    pub discarded: usize,
    /// Boundary reports that moved a beacon's state.
    pub transitions: usize,
    /// Bare sightings that refreshed a known beacon.
    pub sightings: usize,
    /// Store operations that still failed after retrying.
    pub store_faults: usize,
}

/// Applies telemetry batches to a presence store.
pub struct Ingestor<S> {
    store: S,
    range: RangeModel,
    retry: RetryPolicy,
    snapshots: SnapshotCache,
}

impl<S: PresenceStore> Ingestor<S> {
    pub fn new(store: S, range: RangeModel) -> Self {
        Self {
            store,
            range,
            retry: RetryPolicy::default(),
            snapshots: SnapshotCache::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_snapshot_cache(mut self, snapshots: SnapshotCache) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Latest raw batches per device.
    pub fn snapshots(&self) -> &SnapshotCache {
        &self.snapshots
    }

    pub fn range_model(&self) -> &RangeModel {
        &self.range
    }

    /// Apply one telemetry batch received from `device_id` at `at`.
    pub fn record_seen(&self, device_id: &str, readings: &[Reading], at: DateTime<Utc>) -> IngestReport {
        let mut report = IngestReport::default();
        let device_id = device_id.trim();
        if device_id.is_empty() {
            warn!(readings = readings.len(), "telemetry without device identifier discarded");
            report.discarded = readings.len();
            return report;
        }

        self.snapshots.insert(
            DeviceSnapshot {
                device_id: device_id.to_string(),
                readings: readings.to_vec(),
                received_at: at,
            },
            at,
        );

        match self
            .retry
            .run("touch_device", || self.store.touch_device(device_id, at))
        {
            Ok(TouchOutcome::CameOnline(change)) => {
                report.came_online = true;
                info!(
                    device = device_id,
                    first_seen = change.is_first_sighting(),
                    "device online"
                );
            }
            Ok(TouchOutcome::Refreshed) => {}
            Err(err) => {
                report.store_faults += 1;
                warn!(device = device_id, error = %err, "failed to refresh device liveness");
            }
        }

        for reading in readings {
            if let Validation::Failure(errors) = validate_reading(reading) {
                let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
                warn!(
                    device = device_id,
                    beacon = %reading.beacon_id,
                    violations = %reasons.join("; "),
                    "reading discarded"
                );
                report.discarded += 1;
                continue;
            }
            self.apply_reading(device_id, reading, at, &mut report);
        }

        debug!(
            device = device_id,
            accepted = report.accepted,
            discarded = report.discarded,
            transitions = report.transitions,
            "telemetry batch applied"
        );
        report
    }

    fn apply_reading(
        &self,
        device_id: &str,
        reading: &Reading,
        batch_at: DateTime<Utc>,
        report: &mut IngestReport,
    ) {
        let key = reading.beacon_id.trim();
        let seen_at = reading
            .seen_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(batch_at);

        let boundary = match self.range.estimate(reading) {
            Some(estimate) => BoundaryReport::new(key, estimate.state, seen_at)
                .via(device_id)
                .at_distance(estimate.distance_m),
            None => {
                match self
                    .retry
                    .run("observe_beacon", || self.store.observe_beacon(key, device_id, seen_at))
                {
                    Ok(true) => {
                        report.accepted += 1;
                        report.sightings += 1;
                        return;
                    }
                    // Being sighted at all is evidence of presence.
                    Ok(false) => BoundaryReport::new(key, PresenceState::In, seen_at).via(device_id),
                    Err(err) => {
                        report.store_faults += 1;
                        warn!(beacon = key, error = %err, "failed to record sighting");
                        return;
                    }
                }
            }
        };

        match self
            .retry
            .run("apply_boundary", || self.store.apply_boundary(&boundary))
        {
            Ok(BoundaryOutcome { change, .. }) => {
                report.accepted += 1;
                if let Some(change) = change {
                    report.transitions += 1;
                    info!(
                        beacon = key,
                        device = device_id,
                        from = change.from.map(|s| s.as_str()).unwrap_or("unknown"),
                        to = change.to.as_str(),
                        distance_m = boundary.distance_m,
                        "beacon transition"
                    );
                }
            }
            Err(err) => {
                report.store_faults += 1;
                warn!(beacon = key, error = %err, "failed to apply boundary report");
            }
        }
    }
}
