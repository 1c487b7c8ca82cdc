use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::detect::{
    BagDetection, Detection, FaceDetection, FaceEncoder, ObjectDetector, PlateDetection,
    TextRecognizer,
};
use crate::error::InferenceError;
use crate::frame::Frame;
use crate::registry::normalize_plate;

use super::StageKind;

/// One independent detection capability applied to a frame.
///
/// "Nothing found" is `Ok(vec![])`, never an error.
pub trait DetectionStage: Send {
    fn kind(&self) -> StageKind;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;
}

/// Result of one stage on one frame.
#[derive(Debug)]
pub enum StageOutcome {
    Ok(Vec<Detection>),
    Failed(InferenceError),
}

impl StageOutcome {
    pub fn detections(&self) -> &[Detection] {
        match self {
            StageOutcome::Ok(detections) => detections,
            StageOutcome::Failed(_) => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

/// Run a stage, turning errors and panics into `StageOutcome::Failed`.
pub fn run_stage(stage: &mut dyn DetectionStage, frame: &Frame) -> StageOutcome {
    let kind = stage.kind();
    match catch_unwind(AssertUnwindSafe(|| stage.detect(frame))) {
        Ok(Ok(detections)) => StageOutcome::Ok(detections),
        Ok(Err(err)) => StageOutcome::Failed(err),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            StageOutcome::Failed(InferenceError::new(kind, format!("panicked: {}", message)))
        }
    }
}

/// Counts boxes whose label equals the target category (case-insensitive).
pub struct BagStage {
    detector: Box<dyn ObjectDetector>,
    label: String,
}

impl BagStage {
    pub fn new(detector: Box<dyn ObjectDetector>, label: &str) -> Self {
        Self {
            detector,
            label: label.trim().to_string(),
        }
    }
}

impl DetectionStage for BagStage {
    fn kind(&self) -> StageKind {
        StageKind::Bag
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let boxes = self
            .detector
            .detect_objects(frame)
            .map_err(|e| InferenceError::from_provider(StageKind::Bag, e))?;
        let count = boxes
            .iter()
            .filter(|b| b.label.trim().eq_ignore_ascii_case(&self.label))
            .count();
        if count == 0 {
            return Ok(Vec::new());
        }
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(vec![Detection::Bag(BagDetection { count })])
    }
}

/// Plate regions, read by OCR.
///
/// Regions are boxes whose label contains the plate label. Each region is cropped and
/// read; the first reading is normalized, and a region without text is dropped.
pub struct PlateStage {
    detector: Box<dyn ObjectDetector>,
    recognizer: Box<dyn TextRecognizer>,
    label: String,
}

impl PlateStage {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        recognizer: Box<dyn TextRecognizer>,
        label: &str,
    ) -> Self {
        Self {
            detector,
            recognizer,
            label: label.trim().to_lowercase(),
        }
    }
}

impl DetectionStage for PlateStage {
    fn kind(&self) -> StageKind {
        StageKind::Plate
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let boxes = self
            .detector
            .detect_objects(frame)
            .map_err(|e| InferenceError::from_provider(StageKind::Plate, e))?;

        let mut plates = Vec::new();
        for region in boxes
            .into_iter()
            .filter(|b| b.label.to_lowercase().contains(&self.label))
        {
            let crop = match frame.crop(&region.bbox) {
                Ok(crop) => crop,
                Err(e) => {
                    log::debug!("frame {}: skipping plate region: {}", frame.index, e);
                    continue;
                }
            };
            let readings = self
                .recognizer
                .read_text(&crop)
                .map_err(|e| InferenceError::from_provider(StageKind::Plate, e))?;
            let Some(reading) = readings.into_iter().next() else {
                continue;
            };
            let text = normalize_plate(&reading.text);
            if text.is_empty() {
                continue;
            }
            plates.push(Detection::Plate(PlateDetection {
                bbox: region.bbox,
                text,
                confidence: region.score * 100.0,
            }));
        }
        Ok(plates)
    }
}

/// One detection per face region. No deduplication.
pub struct FaceStage {
    encoder: Box<dyn FaceEncoder>,
}

impl FaceStage {
    pub fn new(encoder: Box<dyn FaceEncoder>) -> Self {
        Self { encoder }
    }
}

impl DetectionStage for FaceStage {
    fn kind(&self) -> StageKind {
        StageKind::Face
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let faces = self
            .encoder
            .encode_faces(frame)
            .map_err(|e| InferenceError::from_provider(StageKind::Face, e))?;
        Ok(faces
            .into_iter()
            .map(|face| {
                Detection::Face(FaceDetection {
                    bbox: face.bbox,
                    embedding: face.embedding,
                    confidence: face.score * 100.0,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{ScriptedObjectDetector, ScriptedTextRecognizer};
    use crate::detect::ObjectBox;
    use crate::frame::BoundingBox;

    fn frame(index: u64) -> Frame {
        Frame::new(index, 0, 64, 48, vec![0u8; 64 * 48 * 3]).unwrap()
    }

    fn object(label: &str, score: f32) -> ObjectBox {
        ObjectBox {
            bbox: BoundingBox::new(4.0, 4.0, 40.0, 20.0),
            label: label.to_string(),
            score,
        }
    }

    struct Panicking;

    impl DetectionStage for Panicking {
        fn kind(&self) -> StageKind {
            StageKind::Face
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            panic!("model exploded");
        }
    }

    #[test]
    fn bag_stage_counts_only_target_label() {
        let detector = ScriptedObjectDetector::new().emit(
            0,
            vec![
                object("Gunny Bag", 0.9),
                object("gunny bag", 0.8),
                object("person", 0.9),
            ],
        );
        let mut stage = BagStage::new(Box::new(detector), "gunny bag");
        let detections = stage.detect(&frame(0)).unwrap();
        assert_eq!(detections, vec![Detection::Bag(BagDetection { count: 2 })]);
        assert!(stage.detect(&frame(1)).unwrap().is_empty());
    }

    #[test]
    fn plate_stage_normalizes_and_drops_empty_readings() {
        let detector = ScriptedObjectDetector::new().emit(
            0,
            vec![object("number_plate", 0.87), object("number_plate", 0.5)],
        );
        let recognizer = ScriptedTextRecognizer::new().then_read("ka01 ab 1234").then_read("");
        let mut stage = PlateStage::new(Box::new(detector), Box::new(recognizer), "plate");
        let detections = stage.detect(&frame(0)).unwrap();
        assert_eq!(detections.len(), 1);
        let Detection::Plate(plate) = &detections[0] else {
            panic!("expected a plate");
        };
        assert_eq!(plate.text, "KA01AB1234");
        assert!((plate.confidence - 87.0).abs() < 1e-4);
    }

    #[test]
    fn ocr_failure_fails_the_stage() {
        let detector = ScriptedObjectDetector::new().emit(0, vec![object("plate", 0.9)]);
        let recognizer = ScriptedTextRecognizer::new().then_fail("ocr crashed");
        let mut stage = PlateStage::new(Box::new(detector), Box::new(recognizer), "plate");
        let err = stage.detect(&frame(0)).unwrap_err();
        assert_eq!(err.stage, StageKind::Plate);
        assert!(err.message.contains("ocr crashed"));
    }

    #[test]
    fn panics_become_failed_outcomes() {
        let outcome = run_stage(&mut Panicking, &frame(0));
        let StageOutcome::Failed(err) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(err.stage, StageKind::Face);
        assert!(err.message.contains("model exploded"));
    }
}
