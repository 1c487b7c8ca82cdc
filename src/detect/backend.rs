use anyhow::Result;

use crate::detect::result::{FaceRegion, ObjectBox, TextReading};
use crate::frame::{Frame, FrameCrop};

/// Object detector capability (bag and plate-region models).
///
/// Implementations must treat the frame as read-only and must not retain pixels
/// beyond the call. "Nothing found" is `Ok(vec![])`, never an error.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// OCR capability applied to a plate crop.
pub trait TextRecognizer: Send {
    fn name(&self) -> &'static str;

    /// Readings for the crop, best first. Empty when no text is extractable.
    fn read_text(&mut self, crop: &FrameCrop) -> Result<Vec<TextReading>>;

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Face detection plus embedding capability.
pub trait FaceEncoder: Send {
    fn name(&self) -> &'static str;

    /// One region per detected face, in detector order.
    fn encode_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>>;

    /// True for stand-ins whose "faces" are not real detections.
    fn is_synthetic(&self) -> bool {
        false
    }

    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
