//! Event and reference storage.
//!
//! Event tables are append-only: `CHECK` constraints hold the record invariants and
//! triggers abort any `UPDATE` or `DELETE`, so the store enforces both itself.
//! A frame's events are staged in a [`FrameTransaction`] and written in one SQLite
//! transaction on commit; an uncommitted frame writes nothing.

use std::sync::Mutex;

use anyhow::anyhow;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::{PersistenceError, RegistryLoadError};
use crate::events::{Event, EventCounts, FaceLogEvent, GunnyBagEvent, VehicleLogEvent};
use crate::frame::FrameStamp;
use crate::matching::{FaceStatus, PlateStatus};
use crate::open_db_connection;
use crate::registry::{
    normalize_plate, UserDirectory, UserRecord, Vehicle, VehicleRegistry, VehicleType,
};

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  role TEXT NOT NULL,
  is_authorized INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS vehicles (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  license_plate TEXT NOT NULL UNIQUE,
  vehicle_type TEXT NOT NULL,
  is_authorized INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS gunny_bag_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp TEXT NOT NULL,
  timestamp_ms INTEGER NOT NULL,
  frame_index INTEGER NOT NULL CHECK (frame_index >= 0),
  camera_id TEXT NOT NULL,
  location_zone TEXT NOT NULL,
  bag_count INTEGER NOT NULL CHECK (bag_count >= 0),
  estimated_volume REAL NOT NULL CHECK (estimated_volume >= 0)
);

CREATE TABLE IF NOT EXISTS vehicle_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp TEXT NOT NULL,
  timestamp_ms INTEGER NOT NULL,
  frame_index INTEGER NOT NULL CHECK (frame_index >= 0),
  camera_id TEXT NOT NULL,
  license_plate TEXT NOT NULL CHECK (length(license_plate) > 0),
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0 AND 100),
  status TEXT NOT NULL CHECK (status IN ('Authorized', 'Unauthorized'))
);

CREATE TABLE IF NOT EXISTS face_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp TEXT NOT NULL,
  timestamp_ms INTEGER NOT NULL,
  frame_index INTEGER NOT NULL CHECK (frame_index >= 0),
  camera_id TEXT NOT NULL,
  user_id INTEGER,
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0 AND 100),
  status TEXT NOT NULL CHECK (status IN ('Verified', 'Intrusion')),
  CHECK ((status = 'Verified') = (user_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_vehicle_logs_ts ON vehicle_logs(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_face_logs_ts ON face_logs(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_gunny_bag_events_ts ON gunny_bag_events(timestamp_ms);

CREATE TRIGGER IF NOT EXISTS gunny_bag_events_no_update BEFORE UPDATE ON gunny_bag_events
BEGIN SELECT RAISE(ABORT, 'gunny_bag_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS gunny_bag_events_no_delete BEFORE DELETE ON gunny_bag_events
BEGIN SELECT RAISE(ABORT, 'gunny_bag_events is append-only'); END;
CREATE TRIGGER IF NOT EXISTS vehicle_logs_no_update BEFORE UPDATE ON vehicle_logs
BEGIN SELECT RAISE(ABORT, 'vehicle_logs is append-only'); END;
CREATE TRIGGER IF NOT EXISTS vehicle_logs_no_delete BEFORE DELETE ON vehicle_logs
BEGIN SELECT RAISE(ABORT, 'vehicle_logs is append-only'); END;
CREATE TRIGGER IF NOT EXISTS face_logs_no_update BEFORE UPDATE ON face_logs
BEGIN SELECT RAISE(ABORT, 'face_logs is append-only'); END;
CREATE TRIGGER IF NOT EXISTS face_logs_no_delete BEFORE DELETE ON face_logs
BEGIN SELECT RAISE(ABORT, 'face_logs is append-only'); END;
"#;

const TIMESTAMP_SQL: &str = "strftime('%Y-%m-%d %H:%M:%f', ?1 / 1000.0, 'unixepoch')";

/// Create all tables, indexes and append-only triggers if they are missing.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// What a successful frame commit wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub frame_index: u64,
    pub counts: EventCounts,
}

/// A committed row and its store-assigned id.
#[derive(Clone, Debug, PartialEq)]
pub struct Committed<T> {
    pub id: i64,
    pub event: T,
}

/// Append-only event store committing one frame at a time.
pub trait PersistenceSink {
    /// Open the staging area for one frame. The returned handle borrows the sink,
    /// so at most one frame is open at a time.
    fn begin_frame(&mut self, stamp: FrameStamp) -> FrameTransaction<'_>;

    /// Write every event atomically, or nothing.
    fn commit_frame(
        &mut self,
        stamp: FrameStamp,
        events: &[Event],
    ) -> Result<CommitReceipt, PersistenceError>;

    fn counts(&self) -> Result<EventCounts, PersistenceError>;
}

/// Events staged for one frame. Dropping it without `commit` discards them.
pub struct FrameTransaction<'a> {
    sink: &'a mut dyn PersistenceSink,
    stamp: FrameStamp,
    events: Vec<Event>,
}

impl<'a> FrameTransaction<'a> {
    pub fn new(sink: &'a mut dyn PersistenceSink, stamp: FrameStamp) -> Self {
        Self {
            sink,
            stamp,
            events: Vec::new(),
        }
    }

    pub fn stamp(&self) -> FrameStamp {
        self.stamp
    }

    /// Stage one event. Events from another frame are refused.
    pub fn append(&mut self, event: Event) -> Result<(), PersistenceError> {
        if event.frame_index() != self.stamp.index {
            return Err(PersistenceError::Rejected(format!(
                "event for frame {} staged in frame {}",
                event.frame_index(),
                self.stamp.index
            )));
        }
        self.events.push(event);
        Ok(())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn commit(self) -> Result<CommitReceipt, PersistenceError> {
        let FrameTransaction {
            sink,
            stamp,
            events,
        } = self;
        sink.commit_frame(stamp, &events)
    }
}

// ----------------------------------------------------------------------------
// SQLite event store
// ----------------------------------------------------------------------------

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self, PersistenceError> {
        let conn = open_db_connection(db_path)?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Direct access for read-side tooling.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn gunny_bag_events(&self) -> Result<Vec<Committed<GunnyBagEvent>>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp_ms, frame_index, camera_id, location_zone, bag_count, estimated_volume \
             FROM gunny_bag_events ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Committed {
                id: row.get(0)?,
                event: GunnyBagEvent {
                    timestamp_ms: row.get(1)?,
                    frame_index: frame_index_from(row.get(2)?),
                    camera_id: row.get(3)?,
                    zone: row.get(4)?,
                    bag_count: row.get(5)?,
                    estimated_volume: row.get(6)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn vehicle_logs(&self) -> Result<Vec<Committed<VehicleLogEvent>>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp_ms, frame_index, camera_id, license_plate, confidence, status \
             FROM vehicle_logs ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(6)?;
            Ok(Committed {
                id: row.get(0)?,
                event: VehicleLogEvent {
                    timestamp_ms: row.get(1)?,
                    frame_index: frame_index_from(row.get(2)?),
                    camera_id: row.get(3)?,
                    plate: row.get(4)?,
                    confidence: row.get::<_, f64>(5)? as f32,
                    status: parse_plate_status(&status).ok_or_else(|| bad_status(6, &status))?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn face_logs(&self) -> Result<Vec<Committed<FaceLogEvent>>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp_ms, frame_index, camera_id, user_id, confidence, status \
             FROM face_logs ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(6)?;
            Ok(Committed {
                id: row.get(0)?,
                event: FaceLogEvent {
                    timestamp_ms: row.get(1)?,
                    frame_index: frame_index_from(row.get(2)?),
                    camera_id: row.get(3)?,
                    person_id: row.get(4)?,
                    confidence: row.get::<_, f64>(5)? as f32,
                    status: parse_face_status(&status).ok_or_else(|| bad_status(6, &status))?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl PersistenceSink for SqliteEventStore {
    fn begin_frame(&mut self, stamp: FrameStamp) -> FrameTransaction<'_> {
        FrameTransaction::new(self, stamp)
    }

    fn commit_frame(
        &mut self,
        stamp: FrameStamp,
        events: &[Event],
    ) -> Result<CommitReceipt, PersistenceError> {
        let mut counts = EventCounts::default();
        let tx = self.conn.transaction()?;
        for event in events {
            insert_event(&tx, event)?;
            counts.record(event);
        }
        tx.commit()?;
        log::debug!(
            "committed frame {}: {} event(s)",
            stamp.index,
            counts.total()
        );
        Ok(CommitReceipt {
            frame_index: stamp.index,
            counts,
        })
    }

    fn counts(&self) -> Result<EventCounts, PersistenceError> {
        let count = |table: &str| -> rusqlite::Result<u64> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(EventCounts {
            gunny_bag_events: count("gunny_bag_events")?,
            vehicle_logs: count("vehicle_logs")?,
            face_logs: count("face_logs")?,
        })
    }
}

fn insert_event(tx: &Transaction<'_>, event: &Event) -> Result<(), PersistenceError> {
    let frame_index = i64::try_from(event.frame_index())
        .map_err(|_| PersistenceError::Rejected("frame index exceeds i64 range".to_string()))?;
    match event {
        Event::GunnyBag(e) => {
            tx.execute(
                &format!(
                    "INSERT INTO gunny_bag_events(timestamp, timestamp_ms, frame_index, camera_id, \
                     location_zone, bag_count, estimated_volume) \
                     VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6)",
                    TIMESTAMP_SQL
                ),
                params![
                    e.timestamp_ms,
                    frame_index,
                    e.camera_id,
                    e.zone,
                    e.bag_count,
                    e.estimated_volume
                ],
            )?;
        }
        Event::VehicleLog(e) => {
            tx.execute(
                &format!(
                    "INSERT INTO vehicle_logs(timestamp, timestamp_ms, frame_index, camera_id, \
                     license_plate, confidence, status) \
                     VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6)",
                    TIMESTAMP_SQL
                ),
                params![
                    e.timestamp_ms,
                    frame_index,
                    e.camera_id,
                    e.plate,
                    e.confidence as f64,
                    e.status.as_str()
                ],
            )?;
        }
        Event::FaceLog(e) => {
            tx.execute(
                &format!(
                    "INSERT INTO face_logs(timestamp, timestamp_ms, frame_index, camera_id, \
                     user_id, confidence, status) \
                     VALUES ({}, ?1, ?2, ?3, ?4, ?5, ?6)",
                    TIMESTAMP_SQL
                ),
                params![
                    e.timestamp_ms,
                    frame_index,
                    e.camera_id,
                    e.person_id,
                    e.confidence as f64,
                    e.status.as_str()
                ],
            )?;
        }
    }
    Ok(())
}

fn frame_index_from(value: i64) -> u64 {
    value.max(0) as u64
}

fn parse_plate_status(value: &str) -> Option<PlateStatus> {
    match value {
        "Authorized" => Some(PlateStatus::Authorized),
        "Unauthorized" => Some(PlateStatus::Unauthorized),
        _ => None,
    }
}

fn parse_face_status(value: &str) -> Option<FaceStatus> {
    match value {
        "Verified" => Some(FaceStatus::Verified),
        "Intrusion" => Some(FaceStatus::Intrusion),
        _ => None,
    }
}

fn bad_status(column: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        Type::Text,
        format!("unknown status {:?}", value).into(),
    )
}

// ----------------------------------------------------------------------------
// SQLite reference tables
// ----------------------------------------------------------------------------

/// `users` and `vehicles`, queried at match time.
pub struct SqliteReferenceStore {
    conn: Mutex<Connection>,
}

impl SqliteReferenceStore {
    /// Open an existing store. Both reference tables must already exist.
    pub fn open(db_path: &str) -> Result<Self, RegistryLoadError> {
        let conn = open_db_connection(db_path)?;
        register_plate_function(&conn)?;
        for table in ["users", "vehicles"] {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(RegistryLoadError::Store(format!(
                    "table '{}' is missing from {} (run `sentinel init-db`)",
                    table, db_path
                )));
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a store, creating the schema first if needed.
    pub fn open_or_create(db_path: &str) -> Result<Self, RegistryLoadError> {
        let conn = open_db_connection(db_path)?;
        ensure_schema(&conn)?;
        register_plate_function(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_user(&self, name: &str, role: &str, authorized: bool) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users(name, role, is_authorized) VALUES (?1, ?2, ?3)",
            params![name, role, authorized],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert or replace a vehicle. The plate is stored normalized.
    pub fn add_vehicle(
        &self,
        plate: &str,
        vehicle_type: &VehicleType,
        authorized: bool,
    ) -> anyhow::Result<i64> {
        let plate = normalize_plate(plate);
        if plate.is_empty() {
            return Err(anyhow!("license plate must not be empty"));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vehicles(license_plate, vehicle_type, is_authorized) VALUES (?1, ?2, ?3) \
             ON CONFLICT(license_plate) DO UPDATE SET vehicle_type = excluded.vehicle_type, \
             is_authorized = excluded.is_authorized",
            params![plate, vehicle_type.as_str(), authorized],
        )?;
        let id = conn.query_row(
            "SELECT id FROM vehicles WHERE license_plate = ?1",
            params![plate],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("reference store lock poisoned"))
    }
}

/// Expose [`normalize_plate`] to SQL so stored plates compare the same way lookups do.
fn register_plate_function(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "normalize_plate",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|plate| normalize_plate(&plate))),
    )
}

impl VehicleRegistry for SqliteReferenceStore {
    fn lookup_vehicle(&self, plate: &str) -> anyhow::Result<Option<Vehicle>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT license_plate, vehicle_type, is_authorized FROM vehicles \
                 WHERE normalize_plate(license_plate) = ?1 \
                 ORDER BY id ASC LIMIT 1",
                params![normalize_plate(plate)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(plate, vehicle_type, authorized)| Vehicle {
            plate: normalize_plate(&plate),
            vehicle_type: VehicleType::parse(&vehicle_type),
            authorized,
        }))
    }
}

impl UserDirectory for SqliteReferenceStore {
    fn find_user(&self, name: &str) -> anyhow::Result<Option<UserRecord>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, name, role, is_authorized FROM users WHERE name = ?1 \
                 ORDER BY id ASC LIMIT 1",
                params![name],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        role: row.get(2)?,
                        authorized: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

// ----------------------------------------------------------------------------
// In-memory event store
// ----------------------------------------------------------------------------

/// Same contract as the SQLite store, held in a `Vec`.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Vec<Event>,
    fail_next: bool,
    fail_at: Option<u64>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next commit, as a full disk or a constraint violation would.
    pub fn fail_next_commit(&mut self) {
        self.fail_next = true;
    }

    /// Reject the commit of frame `frame_index` only.
    pub fn fail_commit_at(&mut self, frame_index: u64) {
        self.fail_at = Some(frame_index);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl PersistenceSink for InMemoryEventStore {
    fn begin_frame(&mut self, stamp: FrameStamp) -> FrameTransaction<'_> {
        FrameTransaction::new(self, stamp)
    }

    fn commit_frame(
        &mut self,
        stamp: FrameStamp,
        events: &[Event],
    ) -> Result<CommitReceipt, PersistenceError> {
        let scheduled = self.fail_at == Some(stamp.index);
        if scheduled {
            self.fail_at = None;
        }
        if std::mem::take(&mut self.fail_next) || scheduled {
            return Err(PersistenceError::Rejected(format!(
                "injected failure at frame {}",
                stamp.index
            )));
        }
        events.iter().try_for_each(check_event)?;
        let mut counts = EventCounts::default();
        for event in events {
            counts.record(event);
            self.events.push(event.clone());
        }
        Ok(CommitReceipt {
            frame_index: stamp.index,
            counts,
        })
    }

    fn counts(&self) -> Result<EventCounts, PersistenceError> {
        let mut counts = EventCounts::default();
        for event in &self.events {
            counts.record(event);
        }
        Ok(counts)
    }
}

/// The checks the SQLite schema enforces with `CHECK` constraints.
fn check_event(event: &Event) -> Result<(), PersistenceError> {
    let in_range = |c: f32| (0.0..=100.0).contains(&c);
    let ok = match event {
        Event::GunnyBag(e) => e.estimated_volume >= 0.0,
        Event::VehicleLog(e) => !e.plate.is_empty() && in_range(e.confidence),
        Event::FaceLog(e) => {
            in_range(e.confidence)
                && ((e.status == FaceStatus::Verified) == e.person_id.is_some())
        }
    };
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::Rejected(format!(
            "event violates store constraints: {:?}",
            event
        )))
    }
}
