use anyhow::Result;

use crate::detect::backend::{FaceEncoder, ObjectDetector, TextRecognizer};
use crate::detect::result::{Embedding, FaceRegion, ObjectBox, TextReading};
use crate::frame::{BoundingBox, Frame, FrameCrop};

const HISTOGRAM_BINS: usize = 8;
const SAMPLE_STRIDE: usize = 97;

/// Object detector that never finds anything. Lets a run proceed without models.
#[derive(Default)]
pub struct StubObjectDetector;

impl ObjectDetector for StubObjectDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_objects(&mut self, _frame: &Frame) -> Result<Vec<ObjectBox>> {
        Ok(Vec::new())
    }
}

/// OCR that never extracts text.
#[derive(Default)]
pub struct StubTextRecognizer;

impl TextRecognizer for StubTextRecognizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn read_text(&mut self, _crop: &FrameCrop) -> Result<Vec<TextReading>> {
        Ok(Vec::new())
    }
}

/// Face encoder stand-in: treats the whole frame as one face and embeds it as a
/// coarse per-channel color histogram (unit norm).
///
/// Identical images embed identically and near-identical images land close
/// together, which is enough to exercise registry loading and matching end to end.
#[derive(Default)]
pub struct HistogramFaceEncoder;

impl HistogramFaceEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FaceEncoder for HistogramFaceEncoder {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn is_synthetic(&self) -> bool {
        true
    }

    fn encode_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        if frame.width == 0 || frame.height == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![FaceRegion {
            bbox: BoundingBox::new(0.0, 0.0, frame.width as f32, frame.height as f32),
            score: 1.0,
            embedding: color_histogram(frame.pixels()),
        }])
    }
}

/// Coarse color histogram over sampled pixels: 8 bins per channel.
pub(crate) fn color_histogram(pixels: &[u8]) -> Embedding {
    let mut histogram = [0f32; HISTOGRAM_BINS * 3];
    for pixel in pixels.chunks_exact(3).step_by(SAMPLE_STRIDE) {
        for (channel, &value) in pixel.iter().enumerate() {
            let bin = value as usize * HISTOGRAM_BINS / 256;
            histogram[channel * HISTOGRAM_BINS + bin] += 1.0;
        }
    }
    Embedding::new(histogram.to_vec()).normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(rgb: [u8; 3]) -> Frame {
        let data = rgb.iter().copied().cycle().take(32 * 32 * 3).collect();
        Frame::new(0, 0, 32, 32, data).unwrap()
    }

    #[test]
    fn stubs_find_nothing() {
        let frame = solid_frame([10, 20, 30]);
        assert!(StubObjectDetector.detect_objects(&frame).unwrap().is_empty());
        let crop = frame.crop(&BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        assert!(StubTextRecognizer.read_text(&crop).unwrap().is_empty());
    }

    #[test]
    fn histogram_encoder_separates_colors() {
        let mut encoder = HistogramFaceEncoder::new();
        let red = encoder.encode_faces(&solid_frame([250, 0, 0])).unwrap();
        let red_again = encoder.encode_faces(&solid_frame([250, 0, 0])).unwrap();
        let blue = encoder.encode_faces(&solid_frame([0, 0, 250])).unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].embedding.distance(&red_again[0].embedding), Some(0.0));
        let apart = red[0].embedding.distance(&blue[0].embedding).unwrap();
        assert!(apart > 1.0, "distance {}", apart);
    }
}
