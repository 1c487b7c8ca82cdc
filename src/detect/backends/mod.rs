pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scripted::{ScriptStep, ScriptedFaceEncoder, ScriptedObjectDetector, ScriptedTextRecognizer};
pub use stub::{HistogramFaceEncoder, StubObjectDetector, StubTextRecognizer};

#[cfg(feature = "backend-tract")]
pub use tract::{TractFaceEncoder, TractObjectDetector, TractTextRecognizer};
