//! Beaconward: presence inference for beacons carried by gateway devices
//!
//! Gateways report beacon sightings over lossy telemetry. Beaconward turns
//! that signal into a clean, deduplicated event log: beacon `in`/`left`
//! transitions, `still_in`/`still_out` heartbeats and `device_offline`
//! demotions, and integrates the log into occupancy windows.
//!
//! The design follows a "pure core, imperative shell" split. Every rule the
//! evaluator applies is a pure function in [`core`]; the stores re-run those
//! rules inside their atomic writes, which makes every tick idempotent.
//!
//! # Core Concepts
//!
//! - **Stores**: device liveness, beacon presence and the notification log
//!   behind the [`store::PresenceStore`] trait
//! - **Ingest**: validates readings and applies boundary transitions
//! - **Evaluator**: periodic TTL, heartbeat and offline sweep
//! - **Reporting**: filtered log reads and presence windows
//!
//! # Example
//!
//! ```rust
//! use beaconward::core::{PresenceState, Thresholds};
//! use beaconward::evaluator::Evaluator;
//! use beaconward::ingest::{Ingestor, RangeModel, Reading};
//! use beaconward::store::{MemoryStore, PresenceStore};
//! use chrono::{Duration, TimeZone, Utc};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let ingestor = Ingestor::new(store.clone(), RangeModel::default());
//! let evaluator = Evaluator::new(store.clone(), Thresholds::from_secs(420, 1200, 600));
//!
//! let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! ingestor.record_seen("dev-1", &[Reading::with_distance("b-1", 1.2)], t0);
//!
//! evaluator
//!     .run_evaluation_tick(t0 + Duration::seconds(421))
//!     .unwrap();
//!
//! let beacon = store.beacon("b-1").unwrap().unwrap();
//! assert_eq!(beacon.state, PresenceState::Out);
//! ```

pub mod config;
pub mod core;
pub mod evaluator;
pub mod ingest;
pub mod report;
pub mod store;

// Re-export commonly used types
pub use config::BeaconwardConfig;
pub use core::{Beacon, Device, Notification, NotificationKind, PresenceState, State};
pub use evaluator::{Evaluator, TickReport};
pub use ingest::{IngestReport, Ingestor};
pub use report::Reporter;
pub use store::{MemoryStore, PresenceStore, SqliteStore};
