//! Guard predicates over store records.
//!
//! Guards are pure boolean functions that decide whether an evaluator rule
//! applies to a record. Rules are built once per tick (they capture the tick
//! time and thresholds) and then checked against every row.

/// Pure predicate over a record.
///
/// # Example
///
/// ```rust
/// use beaconward::core::Guard;
///
/// let even = Guard::new(|n: &u32| n % 2 == 0);
/// let small = Guard::new(|n: &u32| *n < 10);
/// let small_even = even.and(small);
///
/// assert!(small_even.check(&4));
/// assert!(!small_even.check(&12));
/// assert!(!small_even.check(&3));
/// ```
pub struct Guard<T> {
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: 'static> Guard<T> {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be deterministic and thread-safe.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Guard {
            predicate: Box::new(predicate),
        }
    }

    /// Check the guard against a record.
    pub fn check(&self, value: &T) -> bool {
        (self.predicate)(value)
    }

    /// Guard that holds when both guards hold. Short-circuits on `self`.
    pub fn and(self, other: Guard<T>) -> Guard<T> {
        Guard::new(move |value: &T| self.check(value) && other.check(value))
    }

    /// Guard that holds when this one does not.
    pub fn negate(self) -> Guard<T> {
        Guard::new(move |value: &T| !self.check(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Beacon, PresenceState};
    use chrono::{TimeZone, Utc};

    fn beacon(state: PresenceState, active: bool) -> Beacon {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Beacon {
            key: "b-1".to_string(),
            state,
            last_change_ts: at,
            last_still_ts: None,
            owning_device: Some("dev-1".to_string()),
            last_seen_ts: at,
            active,
        }
    }

    #[test]
    fn guard_allows_matching_records() {
        let guard = Guard::new(|b: &Beacon| b.state == PresenceState::In);

        assert!(guard.check(&beacon(PresenceState::In, true)));
        assert!(!guard.check(&beacon(PresenceState::Out, true)));
    }

    #[test]
    fn and_requires_both() {
        let inside = Guard::new(|b: &Beacon| b.state == PresenceState::In);
        let active = Guard::new(|b: &Beacon| b.active);
        let guard = inside.and(active);

        assert!(guard.check(&beacon(PresenceState::In, true)));
        assert!(!guard.check(&beacon(PresenceState::In, false)));
        assert!(!guard.check(&beacon(PresenceState::Out, true)));
    }

    #[test]
    fn negate_inverts() {
        let active = Guard::new(|b: &Beacon| b.active).negate();

        assert!(active.check(&beacon(PresenceState::In, false)));
        assert!(!active.check(&beacon(PresenceState::In, true)));
    }

    #[test]
    fn guard_is_deterministic() {
        let record = beacon(PresenceState::Out, true);
        let guard = Guard::new(|b: &Beacon| b.owning_device.is_some());

        assert_eq!(guard.check(&record), guard.check(&record));
    }
}
