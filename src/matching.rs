//! Authorization and verification decisions.

use crate::detect::{FaceDetection, PlateDetection};
use crate::error::SentinelError;
use crate::registry::{EntityRegistry, Person, Vehicle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlateStatus {
    Authorized,
    Unauthorized,
}

impl PlateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlateStatus::Authorized => "Authorized",
            PlateStatus::Unauthorized => "Unauthorized",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceStatus {
    Verified,
    Intrusion,
}

impl FaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceStatus::Verified => "Verified",
            FaceStatus::Intrusion => "Intrusion",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlateMatch {
    pub status: PlateStatus,
    /// Registry row, when the plate is known at all.
    pub vehicle: Option<Vehicle>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceMatch {
    pub status: FaceStatus,
    /// Set exactly when `status` is `Verified`.
    pub person: Option<Person>,
    /// Distance to the nearest reference, if any reference was comparable.
    pub distance: Option<f32>,
}

/// Resolves detections against the registry.
#[derive(Clone, Copy, Debug)]
pub struct MatchingPolicy {
    face_threshold: f32,
}

impl MatchingPolicy {
    /// `face_threshold` is the exclusive upper bound on an accepted face distance.
    pub fn new(face_threshold: f32) -> Result<Self, SentinelError> {
        if !(face_threshold.is_finite() && face_threshold > 0.0) {
            return Err(SentinelError::Config(format!(
                "face threshold must be finite and greater than zero (got {})",
                face_threshold
            )));
        }
        Ok(Self { face_threshold })
    }

    pub fn face_threshold(&self) -> f32 {
        self.face_threshold
    }

    /// Known and authorized is `Authorized`; unknown or unauthorized is `Unauthorized`.
    pub fn match_plate(
        &self,
        detection: &PlateDetection,
        registry: &EntityRegistry,
    ) -> anyhow::Result<PlateMatch> {
        let vehicle = registry.lookup_vehicle(&detection.text)?;
        let status = match &vehicle {
            Some(v) if v.authorized => PlateStatus::Authorized,
            _ => PlateStatus::Unauthorized,
        };
        Ok(PlateMatch { status, vehicle })
    }

    /// Nearest reference strictly under the threshold is `Verified`, unless that
    /// reference has no user id, in which case the face is an `Intrusion`.
    pub fn match_face(&self, detection: &FaceDetection, registry: &EntityRegistry) -> FaceMatch {
        match registry.nearest_person(&detection.embedding) {
            Some((person, distance)) if distance < self.face_threshold && person.id.is_some() => {
                FaceMatch {
                    status: FaceStatus::Verified,
                    person: Some(person.clone()),
                    distance: Some(distance),
                }
            }
            nearest => FaceMatch {
                status: FaceStatus::Intrusion,
                person: None,
                distance: nearest.map(|(_, d)| d),
            },
        }
    }
}
