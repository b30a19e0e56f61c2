//! Schema bootstrap.
//!
//! The schema version lives in `PRAGMA user_version`. A fresh database is
//! at version 0 and is brought to `SCHEMA_VERSION` in one transaction.

use rusqlite::Connection;
use tracing::info;

use crate::store::StoreError;

/// Version written by this build.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id              TEXT PRIMARY KEY,
    online          INTEGER NOT NULL,
    last_seen_ts    INTEGER NOT NULL,
    last_change_ts  INTEGER NOT NULL,
    last_online_ts  INTEGER NOT NULL,
    last_offline_ts INTEGER
);

CREATE TABLE IF NOT EXISTS beacons (
    key             TEXT PRIMARY KEY,
    state           TEXT NOT NULL,
    last_change_ts  INTEGER NOT NULL,
    last_still_ts   INTEGER,
    owning_device   TEXT,
    last_seen_ts    INTEGER NOT NULL,
    active          INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS beacons_by_device ON beacons (owning_device);

CREATE TABLE IF NOT EXISTS notifications (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    subject     TEXT NOT NULL,
    device      TEXT,
    distance_m  REAL,
    event_time  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS notifications_by_subject ON notifications (subject, id);
";

/// Read the stored schema version.
pub fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the database to `SCHEMA_VERSION`.
///
/// A database written by a newer build is rejected rather than touched.
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let found = schema_version(conn)?;
    if found == SCHEMA_VERSION {
        return Ok(());
    }
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    info!(from = found, to = SCHEMA_VERSION, "migrated presence schema");
    Ok(())
}
