use serde::{Deserialize, Serialize};

use crate::frame::BoundingBox;

/// Labelled region reported by an object detector.
#[derive(Clone, Debug)]
pub struct ObjectBox {
    pub bbox: BoundingBox,
    /// Class name as the model reports it (e.g. "gunny bag", "number_plate").
    pub label: String,
    /// Detector score in 0..=1.
    pub score: f32,
}

/// One OCR reading of a crop, best first.
#[derive(Clone, Debug)]
pub struct TextReading {
    pub text: String,
    pub score: f32,
}

/// Face region plus its identity embedding.
#[derive(Clone, Debug)]
pub struct FaceRegion {
    pub bbox: BoundingBox,
    /// Face detector score in 0..=1.
    pub score: f32,
    pub embedding: Embedding,
}

/// Fixed-length identity signature compared by Euclidean distance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance, or `None` when the lengths differ or the result is not finite.
    pub fn distance(&self, other: &Embedding) -> Option<f32> {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return None;
        }
        let sum: f32 = self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        let d = sum.sqrt();
        d.is_finite().then_some(d)
    }

    /// Scale to unit L2 norm. A zero vector is returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            for v in &mut self.0 {
                *v /= norm;
            }
        }
        self
    }
}

/// Bags of the target category counted on one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BagDetection {
    pub count: u32,
}

/// One plate reading. `text` is already whitespace-stripped and normalized.
#[derive(Clone, Debug, PartialEq)]
pub struct PlateDetection {
    pub bbox: BoundingBox,
    pub text: String,
    /// Region detector confidence in 0..=100.
    pub confidence: f32,
}

/// One face seen on one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
    /// Face detector confidence in 0..=100.
    pub confidence: f32,
}

/// Output of a single detection stage on a single frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Detection {
    Bag(BagDetection),
    Plate(PlateDetection),
    Face(FaceDetection),
}
