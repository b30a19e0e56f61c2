//! Periodic presence evaluation.
//!
//! One tick sweeps devices first, so that beacons whose carrier has just
//! been demoted are already inactive, then sweeps beacons against the set
//! of online devices. Every decision is recomputed from stored rows and the
//! tick time; nothing is carried between ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::core::{stale_device, Beacon, BeaconRules, BeaconVerdict, Thresholds};
use crate::store::{PresenceStore, RetryPolicy, StoreError};

pub mod error;
mod schedule;

pub use error::EvaluatorError;
pub use schedule::Scheduler;

/// Counts for one evaluation tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick_id: Uuid,
    pub now: DateTime<Utc>,
    pub devices_demoted: usize,
    pub beacons_expired: usize,
    pub heartbeats: usize,
    /// Beacons skipped because their carrier is offline or unknown.
    pub carrier_dark: usize,
    /// Dark-carrier beacons this tick marked inactive.
    pub beacons_deactivated: usize,
    /// Rows whose write still failed after retrying.
    pub row_failures: usize,
}

impl TickReport {
    fn new(tick_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            tick_id,
            now,
            devices_demoted: 0,
            beacons_expired: 0,
            heartbeats: 0,
            carrier_dark: 0,
            beacons_deactivated: 0,
            row_failures: 0,
        }
    }

    /// Number of notifications the tick appended.
    pub fn notifications(&self) -> usize {
        self.devices_demoted + self.beacons_expired + self.heartbeats
    }
}

/// Runs evaluation ticks against a presence store.
pub struct Evaluator<S> {
    store: S,
    thresholds: Thresholds,
    retry: RetryPolicy,
}

impl<S: PresenceStore> Evaluator<S> {
    pub fn new(store: S, thresholds: Thresholds) -> Self {
        Self {
            store,
            thresholds,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one tick at `now`.
    ///
    /// Idempotent: running it again at the same `now` without new telemetry
    /// appends nothing. Fails only when a table cannot be listed.
    pub fn run_evaluation_tick(&self, now: DateTime<Utc>) -> Result<TickReport, EvaluatorError> {
        let tick_id = Uuid::new_v4();
        let span = info_span!("evaluation_tick", %tick_id, %now);
        let _entered = span.enter();

        let mut report = TickReport::new(tick_id, now);
        self.sweep_devices(now, &mut report)?;
        self.sweep_beacons(now, &mut report)?;

        info!(
            demoted = report.devices_demoted,
            expired = report.beacons_expired,
            heartbeats = report.heartbeats,
            carrier_dark = report.carrier_dark,
            deactivated = report.beacons_deactivated,
            row_failures = report.row_failures,
            "evaluation tick complete"
        );
        Ok(report)
    }

    fn sweep_devices(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), EvaluatorError> {
        let threshold = self.thresholds.device_offline;
        let devices = self
            .retry
            .run("list_devices", || self.store.devices())
            .map_err(listing("devices"))?;

        let stale = stale_device(now, threshold);
        for device in devices.iter().filter(|d| stale.check(d)) {
            match self
                .retry
                .run("demote_device", || self.store.demote_device(&device.id, now, threshold))
            {
                Ok(Some(_)) => {
                    report.devices_demoted += 1;
                    info!(
                        device = %device.id,
                        last_seen = %device.last_seen_ts,
                        "device offline"
                    );
                }
                Ok(None) => debug!(device = %device.id, "device refreshed before demotion"),
                Err(err) => {
                    report.row_failures += 1;
                    warn!(device = %device.id, error = %err, "failed to demote device");
                }
            }
        }
        Ok(())
    }

    fn sweep_beacons(&self, now: DateTime<Utc>, report: &mut TickReport) -> Result<(), EvaluatorError> {
        let online = self
            .retry
            .run("list_online_devices", || self.store.online_devices())
            .map_err(listing("devices"))?;
        let beacons = self
            .retry
            .run("list_beacons", || self.store.beacons())
            .map_err(listing("beacons"))?;

        let rules = BeaconRules::at(now, &self.thresholds);
        for beacon in &beacons {
            let carrier_online = beacon
                .owning_device
                .as_ref()
                .map_or(true, |device| online.contains(device));

            match rules.judge(beacon, carrier_online) {
                BeaconVerdict::CarrierDark => {
                    report.carrier_dark += 1;
                    if beacon.active {
                        self.deactivate(beacon, report);
                    }
                }
                BeaconVerdict::Expire { last_seen } => {
                    match self.retry.run("expire_beacon", || {
                        self.store.expire_beacon(&beacon.key, now, &self.thresholds)
                    }) {
                        Ok(Some(_)) => {
                            report.beacons_expired += 1;
                            info!(beacon = %beacon.key, %last_seen, "beacon left (ttl)");
                        }
                        Ok(None) => debug!(beacon = %beacon.key, "beacon refreshed before expiry"),
                        Err(err) => {
                            report.row_failures += 1;
                            warn!(beacon = %beacon.key, error = %err, "failed to expire beacon");
                        }
                    }
                }
                BeaconVerdict::Heartbeat(kind) => {
                    match self.retry.run("record_heartbeat", || {
                        self.store.record_heartbeat(&beacon.key, now, &self.thresholds)
                    }) {
                        Ok(Some(_)) => {
                            report.heartbeats += 1;
                            debug!(beacon = %beacon.key, %kind, "heartbeat");
                        }
                        Ok(None) => debug!(beacon = %beacon.key, "heartbeat no longer due"),
                        Err(err) => {
                            report.row_failures += 1;
                            warn!(beacon = %beacon.key, error = %err, "failed to record heartbeat");
                        }
                    }
                }
                BeaconVerdict::Silent | BeaconVerdict::Throttled => {}
            }
        }
        Ok(())
    }

    /// Presence of a beacon whose carrier is dark is unknown.
    fn deactivate(&self, beacon: &Beacon, report: &mut TickReport) {
        match self
            .retry
            .run("deactivate_beacon", || self.store.deactivate_beacon(&beacon.key))
        {
            Ok(true) => {
                report.beacons_deactivated += 1;
                info!(
                    beacon = %beacon.key,
                    carrier = ?beacon.owning_device,
                    "beacon inactive, carrier dark"
                );
            }
            Ok(false) => debug!(beacon = %beacon.key, "carrier back before deactivation"),
            Err(err) => {
                report.row_failures += 1;
                warn!(beacon = %beacon.key, error = %err, "failed to deactivate beacon");
            }
        }
    }
}

fn listing(table: &'static str) -> impl FnOnce(StoreError) -> EvaluatorError {
    move |source| EvaluatorError::Listing { table, source }
}
