//! SQLite-backed presence store.
//!
//! Every mutation runs inside one `IMMEDIATE` transaction: the current row
//! is read, the shared transition rules decide the new row, and the row and
//! any notification are written before commit. Concurrent writers are
//! serialised by SQLite, so a condition checked inside the transaction still
//! holds when it commits.
//!
//! Beacon and device timestamps are stored as unix seconds. Notification
//! times are stored as RFC 3339 text in UTC with a `Z` suffix, which keeps
//! lexical order equal to time order.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{
    apply, paginate, BoundaryOutcome, BoundaryReport, NotificationFilter, PresenceStore, StoreError,
    TouchOutcome,
};
use crate::core::{
    parse_timestamp, Beacon, Device, NewNotification, Notification, NotificationKind,
    PresenceState, Thresholds,
};

pub mod schema;

pub use schema::SCHEMA_VERSION;

const DEVICE_COLUMNS: &str =
    "id, online, last_seen_ts, last_change_ts, last_online_ts, last_offline_ts";
const BEACON_COLUMNS: &str =
    "key, state, last_change_ts, last_still_ts, owning_device, last_seen_ts, active";
const NOTIFICATION_COLUMNS: &str =
    "id, kind, subject, device, distance_m, event_time, created_at";

/// Presence store persisted in a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        schema::migrate(&mut conn)?;

        debug!(?path, journal_mode = %journal_mode, "opened presence store");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside one immediate transaction.
    fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a beacon rule against the row and its carrier, committing the
    /// result if the rule fires.
    fn evaluate<F>(&self, key: &str, rule: F) -> Result<Option<Notification>, StoreError>
    where
        F: FnOnce(&Beacon, bool) -> Option<(Beacon, NewNotification)>,
    {
        self.write(|conn| {
            let Some((beacon, online)) = select_carried_beacon(conn, key)? else {
                return Ok(None);
            };
            let Some((updated, notification)) = rule(&beacon, online) else {
                return Ok(None);
            };
            upsert_beacon(conn, &updated)?;
            insert_notification(conn, notification).map(Some)
        })
    }

    /// Every log row matching `filter` that decodes, in insertion order.
    fn readable_notifications(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, StoreError> {
        let (clause, values) = where_clause(filter);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications{clause} ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), NotificationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter_map(NotificationRow::decode).collect())
    }
}

impl PresenceStore for SqliteStore {
    fn touch_device(&self, id: &str, at: DateTime<Utc>) -> Result<TouchOutcome, StoreError> {
        self.write(|conn| {
            let existing = select_device(conn, id)?;
            let (device, outcome) = apply::touch(existing, id, at);
            upsert_device(conn, &device)?;
            Ok(outcome)
        })
    }

    fn device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        select_device(&self.conn.lock(), id)
    }

    fn devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"))?;
        let rows = stmt
            .query_map([], DeviceRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter_map(|row| skip_corrupt(row.decode())).collect())
    }

    fn demote_device(
        &self,
        id: &str,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Option<Notification>, StoreError> {
        self.write(|conn| {
            let Some(device) = select_device(conn, id)? else {
                return Ok(None);
            };
            let Some((demoted, notification)) = apply::demote(&device, now, threshold) else {
                return Ok(None);
            };
            upsert_device(conn, &demoted)?;
            conn.execute(
                "UPDATE beacons SET active = 0 WHERE owning_device = ?1",
                params![id],
            )?;
            insert_notification(conn, notification).map(Some)
        })
    }

    fn observe_beacon(
        &self,
        key: &str,
        device: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.write(|conn| {
            let Some(beacon) = select_beacon(conn, key)? else {
                return Ok(false);
            };
            upsert_beacon(conn, &apply::sighted(beacon, Some(device), at))?;
            Ok(true)
        })
    }

    fn apply_boundary(&self, report: &BoundaryReport) -> Result<BoundaryOutcome, StoreError> {
        self.write(|conn| {
            let existing = select_beacon(conn, &report.key)?;
            let (beacon, notification, change) = apply::boundary(existing, report);
            upsert_beacon(conn, &beacon)?;
            let notification = insert_notification(conn, notification)?;
            Ok(BoundaryOutcome {
                notification,
                change,
            })
        })
    }

    fn deactivate_beacon(&self, key: &str) -> Result<bool, StoreError> {
        self.write(|conn| {
            let Some((beacon, online)) = select_carried_beacon(conn, key)? else {
                return Ok(false);
            };
            let Some(dark) = apply::darken(&beacon, online) else {
                return Ok(false);
            };
            upsert_beacon(conn, &dark)?;
            Ok(true)
        })
    }

    fn beacon(&self, key: &str) -> Result<Option<Beacon>, StoreError> {
        select_beacon(&self.conn.lock(), key)
    }

    fn beacons(&self) -> Result<Vec<Beacon>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {BEACON_COLUMNS} FROM beacons ORDER BY key"))?;
        let rows = stmt
            .query_map([], BeaconRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().filter_map(|row| skip_corrupt(row.decode())).collect())
    }

    fn expire_beacon(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        self.evaluate(key, |beacon, online| apply::expire(beacon, online, now, thresholds))
    }

    fn record_heartbeat(
        &self,
        key: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Result<Option<Notification>, StoreError> {
        self.evaluate(key, |beacon, online| apply::heartbeat(beacon, online, now, thresholds))
    }

    // Unreadable rows are dropped before paging, so pages stay full and the
    // count agrees with what a listing can return.
    fn notifications(&self, filter: &NotificationFilter) -> Result<Vec<Notification>, StoreError> {
        let readable = self.readable_notifications(filter)?;
        Ok(paginate(readable.into_iter(), filter))
    }

    fn count_notifications(&self, filter: &NotificationFilter) -> Result<usize, StoreError> {
        Ok(self.readable_notifications(filter)?.len())
    }
}

/// SQL selection for a notification filter, without pagination.
fn where_clause(filter: &NotificationFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values = Vec::new();

    if !filter.kinds.is_empty() {
        let marks = vec!["?"; filter.kinds.len()].join(", ");
        clauses.push(format!("kind IN ({marks})"));
        values.extend(
            filter
                .kinds
                .iter()
                .map(|kind| Value::Text(kind.as_str().to_string())),
        );
    }
    if let Some(subject) = &filter.subject {
        clauses.push("subject = ?".to_string());
        values.push(Value::Text(subject.clone()));
    }
    if let Some(device) = &filter.device {
        clauses.push("device = ?".to_string());
        values.push(Value::Text(device.clone()));
    }
    if let Some(since) = filter.since {
        clauses.push("event_time >= ?".to_string());
        values.push(Value::Text(format_time(since)));
    }
    if let Some(until) = filter.until {
        clauses.push("event_time <= ?".to_string());
        values.push(Value::Text(format_time(until)));
    }
    if let Some(needle) = &filter.search {
        clauses.push("(instr(lower(subject), ?) > 0 OR instr(kind, ?) > 0)".to_string());
        values.push(Value::Text(needle.clone()));
        values.push(Value::Text(needle.clone()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn from_unix(table: &'static str, key: &str, secs: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::CorruptRow {
            table,
            key: key.to_string(),
            reason: format!("timestamp {secs} is out of range"),
        })
}

fn skip_corrupt<T>(decoded: Result<T, StoreError>) -> Option<T> {
    match decoded {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "skipping unreadable row");
            None
        }
    }
}

fn select_device(conn: &Connection, id: &str) -> Result<Option<Device>, StoreError> {
    conn.query_row(
        &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
        params![id],
        DeviceRow::read,
    )
    .optional()?
    .map(DeviceRow::decode)
    .transpose()
}

fn upsert_device(conn: &Connection, device: &Device) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO devices (id, online, last_seen_ts, last_change_ts, last_online_ts, last_offline_ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            online = excluded.online,
            last_seen_ts = excluded.last_seen_ts,
            last_change_ts = excluded.last_change_ts,
            last_online_ts = excluded.last_online_ts,
            last_offline_ts = excluded.last_offline_ts",
        params![
            device.id,
            device.online,
            device.last_seen_ts.timestamp(),
            device.last_change_ts.timestamp(),
            device.last_online_ts.timestamp(),
            device.last_offline_ts.map(|ts| ts.timestamp()),
        ],
    )?;
    Ok(())
}

fn select_beacon(conn: &Connection, key: &str) -> Result<Option<Beacon>, StoreError> {
    conn.query_row(
        &format!("SELECT {BEACON_COLUMNS} FROM beacons WHERE key = ?1"),
        params![key],
        BeaconRow::read,
    )
    .optional()?
    .map(BeaconRow::decode)
    .transpose()
}

/// A beacon together with whether its carrier counts as online.
fn select_carried_beacon(
    conn: &Connection,
    key: &str,
) -> Result<Option<(Beacon, bool)>, StoreError> {
    let Some(beacon) = select_beacon(conn, key)? else {
        return Ok(None);
    };
    let carrier = match beacon.owning_device.as_deref() {
        Some(id) => select_device(conn, id)?,
        None => None,
    };
    let online = apply::carrier_online(&beacon, carrier.as_ref());
    Ok(Some((beacon, online)))
}

fn upsert_beacon(conn: &Connection, beacon: &Beacon) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO beacons (key, state, last_change_ts, last_still_ts, owning_device, last_seen_ts, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(key) DO UPDATE SET
            state = excluded.state,
            last_change_ts = excluded.last_change_ts,
            last_still_ts = excluded.last_still_ts,
            owning_device = excluded.owning_device,
            last_seen_ts = excluded.last_seen_ts,
            active = excluded.active",
        params![
            beacon.key,
            beacon.state.as_str(),
            beacon.last_change_ts.timestamp(),
            beacon.last_still_ts.map(|ts| ts.timestamp()),
            beacon.owning_device,
            beacon.last_seen_ts.timestamp(),
            beacon.active,
        ],
    )?;
    Ok(())
}

fn insert_notification(
    conn: &Connection,
    notification: NewNotification,
) -> Result<Notification, StoreError> {
    conn.execute(
        "INSERT INTO notifications (kind, subject, device, distance_m, event_time, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            notification.kind.as_str(),
            notification.subject,
            notification.device,
            notification.distance_m,
            format_time(notification.event_time),
            format_time(notification.created_at),
        ],
    )?;
    Ok(notification.into_recorded(conn.last_insert_rowid()))
}

struct DeviceRow {
    id: String,
    online: bool,
    last_seen_ts: i64,
    last_change_ts: i64,
    last_online_ts: i64,
    last_offline_ts: Option<i64>,
}

impl DeviceRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            online: row.get(1)?,
            last_seen_ts: row.get(2)?,
            last_change_ts: row.get(3)?,
            last_online_ts: row.get(4)?,
            last_offline_ts: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Device, StoreError> {
        let ts = |secs| from_unix("devices", &self.id, secs);
        Ok(Device {
            online: self.online,
            last_seen_ts: ts(self.last_seen_ts)?,
            last_change_ts: ts(self.last_change_ts)?,
            last_online_ts: ts(self.last_online_ts)?,
            last_offline_ts: self.last_offline_ts.map(ts).transpose()?,
            id: self.id.clone(),
        })
    }
}

struct BeaconRow {
    key: String,
    state: String,
    last_change_ts: i64,
    last_still_ts: Option<i64>,
    owning_device: Option<String>,
    last_seen_ts: i64,
    active: bool,
}

impl BeaconRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            state: row.get(1)?,
            last_change_ts: row.get(2)?,
            last_still_ts: row.get(3)?,
            owning_device: row.get(4)?,
            last_seen_ts: row.get(5)?,
            active: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Beacon, StoreError> {
        let state = self
            .state
            .parse::<PresenceState>()
            .map_err(|err| StoreError::CorruptRow {
                table: "beacons",
                key: self.key.clone(),
                reason: err.to_string(),
            })?;
        let ts = |secs| from_unix("beacons", &self.key, secs);
        Ok(Beacon {
            state,
            last_change_ts: ts(self.last_change_ts)?,
            last_still_ts: self.last_still_ts.map(ts).transpose()?,
            last_seen_ts: ts(self.last_seen_ts)?,
            active: self.active,
            owning_device: self.owning_device.clone(),
            key: self.key.clone(),
        })
    }
}

struct NotificationRow {
    id: i64,
    kind: String,
    subject: String,
    device: Option<String>,
    distance_m: Option<f64>,
    event_time: String,
    created_at: String,
}

impl NotificationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            subject: row.get(2)?,
            device: row.get(3)?,
            distance_m: row.get(4)?,
            event_time: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    /// Decode a log row; rows with an unknown kind or unparsable time are
    /// skipped.
    fn decode(self) -> Option<Notification> {
        let kind = match self.kind.parse::<NotificationKind>() {
            Ok(kind) => kind,
            Err(err) => {
                warn!(id = self.id, error = %err, "skipping notification with unknown kind");
                return None;
            }
        };
        let (Some(event_time), Some(created_at)) = (
            parse_timestamp(&self.event_time),
            parse_timestamp(&self.created_at),
        ) else {
            warn!(
                id = self.id,
                event_time = %self.event_time,
                created_at = %self.created_at,
                "skipping notification with unparsable timestamp"
            );
            return None;
        };
        Some(Notification {
            id: self.id,
            kind,
            subject: self.subject,
            device: self.device,
            distance_m: self.distance_m,
            event_time,
            created_at,
        })
    }
}
