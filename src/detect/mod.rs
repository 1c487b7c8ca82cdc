mod backend;
pub mod backends;
mod factory;
mod result;

pub use backend::{FaceEncoder, ObjectDetector, TextRecognizer};
pub use backends::{HistogramFaceEncoder, StubObjectDetector, StubTextRecognizer};
pub use factory::InferenceBackends;
pub use result::{
    BagDetection, Detection, Embedding, FaceDetection, FaceRegion, ObjectBox, PlateDetection,
    TextReading,
};
