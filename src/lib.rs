//! Gate Sentinel
//!
//! Frame-by-frame audit pipeline for a loading gate camera.
//!
//! # Architecture
//!
//! Each decoded frame is fanned out to three independent detection stages:
//!
//! 1. **Bags**: counts cargo units ("gunny bags") visible in the frame.
//! 2. **Plates**: reads license plates and checks them against the vehicle table.
//! 3. **Faces**: embeds faces and matches them against the known-persons registry.
//!
//! Detections are resolved by the [`MatchingPolicy`], turned into event records by
//! the [`EventBuilder`], and committed per frame, atomically, to an append-only
//! store ([`PersistenceSink`]). A failing detector only loses its own detections
//! for that frame.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames and crops
//! - `ingest`: frame sources (local files, synthetic streams, in-memory scripts)
//! - `detect`: opaque inference capabilities and their backends
//! - `registry`: reference data (known persons, vehicle lookup)
//! - `matching`, `events`, `storage`: decision, record, persistence
//! - `pipeline`: detection stages and the frame-loop orchestrator

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod detect;
pub mod error;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod matching;
pub mod pipeline;
pub mod registry;
pub mod storage;

pub use config::SentinelConfig;
pub use detect::{BagDetection, Detection, Embedding, FaceDetection, PlateDetection};
pub use error::{
    InferenceError, PersistenceError, RegistryLoadError, SentinelError, SourceReadError,
};
pub use events::{Event, EventBuilder, EventCounts, FaceLogEvent, GunnyBagEvent, VehicleLogEvent};
pub use frame::{BoundingBox, Frame, FrameCrop, FrameStamp};
pub use ingest::{FileConfig, FileSource, FrameSource, MemorySource};
pub use matching::{FaceMatch, FaceStatus, MatchingPolicy, PlateMatch, PlateStatus};
pub use pipeline::{
    BagStage, DetectionStage, FaceStage, Orchestrator, PlateStage, RunSummary, StageKind,
    StageOutcome, Stages, Termination,
};
pub use registry::{
    normalize_plate, EntityRegistry, InMemoryReferences, Person, UserDirectory, UserRecord,
    Vehicle, VehicleRegistry, VehicleType,
};
pub use storage::{
    CommitReceipt, FrameTransaction, InMemoryEventStore, PersistenceSink, SqliteEventStore,
    SqliteReferenceStore,
};

/// A private shared-cache in-memory database URI.
///
/// Several connections opened on the same URI see the same database, which lets the
/// event store and the reference store share one in-memory schema in tests.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:gate_sentinel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> Result<i64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    Ok(i64::try_from(now.as_millis())?)
}
