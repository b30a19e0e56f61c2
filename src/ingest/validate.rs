//! Reading validation.
//!
//! Every check runs on every reading and all violations are reported
//! together, so a malformed reading is logged once with everything wrong
//! with it.

use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

use super::reading::Reading;
use crate::core::parse_timestamp;

/// Weakest and strongest RSSI accepted, in dBm.
pub const RSSI_RANGE: (i32, i32) = (-127, 20);

/// Reasons a reading is discarded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadingViolation {
    #[error("reading has no beacon identifier")]
    MissingBeaconId,

    #[error("unparsable timestamp '{0}'")]
    BadTimestamp(String),

    #[error("RSSI {0} dBm is outside the receivable range")]
    RssiOutOfRange(i32),

    #[error("distance {0} m is negative or not a number")]
    InvalidDistance(f64),
}

type Check = Validation<(), NonEmptyVec<ReadingViolation>>;

fn check(ok: bool, violation: impl FnOnce() -> ReadingViolation) -> Check {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(violation())
    }
}

/// Validate a reading, accumulating every violation.
pub fn validate_reading(reading: &Reading) -> Check {
    let mut checks: Vec<Check> = vec![check(!reading.beacon_id.trim().is_empty(), || {
        ReadingViolation::MissingBeaconId
    })];

    if let Some(raw) = &reading.seen_at {
        checks.push(check(parse_timestamp(raw).is_some(), || {
            ReadingViolation::BadTimestamp(raw.clone())
        }));
    }

    if let Some(rssi) = reading.rssi {
        checks.push(check(
            (RSSI_RANGE.0..=RSSI_RANGE.1).contains(&rssi),
            || ReadingViolation::RssiOutOfRange(rssi),
        ));
    }

    if let Some(distance) = reading.distance_m {
        checks.push(check(distance.is_finite() && distance >= 0.0, || {
            ReadingViolation::InvalidDistance(distance)
        }));
    }

    Validation::all_vec(checks).map(|_| ())
}
