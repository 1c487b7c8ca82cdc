//! Persistable event records and the pure builder that produces them.

use serde::Serialize;

use crate::detect::{BagDetection, FaceDetection, PlateDetection};
use crate::error::SentinelError;
use crate::frame::FrameStamp;
use crate::matching::{FaceMatch, FaceStatus, PlateMatch, PlateStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GunnyBagEvent {
    pub timestamp_ms: i64,
    pub frame_index: u64,
    pub camera_id: String,
    pub zone: String,
    pub bag_count: u32,
    pub estimated_volume: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleLogEvent {
    pub timestamp_ms: i64,
    pub frame_index: u64,
    pub camera_id: String,
    pub plate: String,
    pub confidence: f32,
    #[serde(serialize_with = "plate_status")]
    pub status: PlateStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FaceLogEvent {
    pub timestamp_ms: i64,
    pub frame_index: u64,
    pub camera_id: String,
    /// `None` exactly when `status` is `Intrusion`.
    pub person_id: Option<i64>,
    pub confidence: f32,
    #[serde(serialize_with = "face_status")]
    pub status: FaceStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    GunnyBag(GunnyBagEvent),
    VehicleLog(VehicleLogEvent),
    FaceLog(FaceLogEvent),
}

impl Event {
    pub fn frame_index(&self) -> u64 {
        match self {
            Event::GunnyBag(e) => e.frame_index,
            Event::VehicleLog(e) => e.frame_index,
            Event::FaceLog(e) => e.frame_index,
        }
    }
}

/// Events per table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub gunny_bag_events: u64,
    pub vehicle_logs: u64,
    pub face_logs: u64,
}

impl EventCounts {
    pub fn record(&mut self, event: &Event) {
        match event {
            Event::GunnyBag(_) => self.gunny_bag_events += 1,
            Event::VehicleLog(_) => self.vehicle_logs += 1,
            Event::FaceLog(_) => self.face_logs += 1,
        }
    }

    pub fn add(&mut self, other: &EventCounts) {
        self.gunny_bag_events += other.gunny_bag_events;
        self.vehicle_logs += other.vehicle_logs;
        self.face_logs += other.face_logs;
    }

    pub fn total(&self) -> u64 {
        self.gunny_bag_events + self.vehicle_logs + self.face_logs
    }
}

/// Turns a detection and its decision into exactly one event. No I/O.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    camera_id: String,
    zone: String,
    volume_per_bag: f64,
}

impl EventBuilder {
    /// `volume_per_bag` must be finite and non-negative, as the store requires.
    pub fn new(camera_id: &str, zone: &str, volume_per_bag: f64) -> Result<Self, SentinelError> {
        if !(volume_per_bag.is_finite() && volume_per_bag >= 0.0) {
            return Err(SentinelError::Config(format!(
                "volume per bag must be finite and non-negative (got {})",
                volume_per_bag
            )));
        }
        Ok(Self {
            camera_id: camera_id.to_string(),
            zone: zone.to_string(),
            volume_per_bag,
        })
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn bag_event(&self, stamp: FrameStamp, detection: &BagDetection) -> Event {
        Event::GunnyBag(GunnyBagEvent {
            timestamp_ms: stamp.timestamp_ms,
            frame_index: stamp.index,
            camera_id: self.camera_id.clone(),
            zone: self.zone.clone(),
            bag_count: detection.count,
            estimated_volume: detection.count as f64 * self.volume_per_bag,
        })
    }

    pub fn vehicle_event(
        &self,
        stamp: FrameStamp,
        detection: &PlateDetection,
        decision: &PlateMatch,
    ) -> Event {
        Event::VehicleLog(VehicleLogEvent {
            timestamp_ms: stamp.timestamp_ms,
            frame_index: stamp.index,
            camera_id: self.camera_id.clone(),
            plate: detection.text.clone(),
            confidence: clamp_confidence(detection.confidence),
            status: decision.status,
        })
    }

    pub fn face_event(
        &self,
        stamp: FrameStamp,
        detection: &FaceDetection,
        decision: &FaceMatch,
    ) -> Event {
        let person_id = match decision.status {
            FaceStatus::Verified => decision.person.as_ref().and_then(|p| p.id),
            FaceStatus::Intrusion => None,
        };
        // A verified decision without a person cannot be logged as verified.
        let status = if person_id.is_some() {
            FaceStatus::Verified
        } else {
            FaceStatus::Intrusion
        };
        Event::FaceLog(FaceLogEvent {
            timestamp_ms: stamp.timestamp_ms,
            frame_index: stamp.index,
            camera_id: self.camera_id.clone(),
            person_id,
            confidence: clamp_confidence(detection.confidence),
            status,
        })
    }
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn plate_status<S: serde::Serializer>(status: &PlateStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

fn face_status<S: serde::Serializer>(status: &FaceStatus, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}
