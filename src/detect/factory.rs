use anyhow::{anyhow, Result};

use crate::config::{BackendKind, BackendSettings};

use super::backend::{FaceEncoder, ObjectDetector, TextRecognizer};
use super::backends::{HistogramFaceEncoder, StubObjectDetector, StubTextRecognizer};

/// The four inference capabilities one run needs, selected from configuration.
///
/// Bag and plate regions come from separate detector models.
pub struct InferenceBackends {
    pub bag_detector: Box<dyn ObjectDetector>,
    pub plate_detector: Box<dyn ObjectDetector>,
    pub text_recognizer: Box<dyn TextRecognizer>,
    pub face_encoder: Box<dyn FaceEncoder>,
}

impl InferenceBackends {
    /// Model-free backends: no bags, no plates, whole-frame histogram faces.
    pub fn stub() -> Self {
        Self {
            bag_detector: Box::new(StubObjectDetector),
            plate_detector: Box::new(StubObjectDetector),
            text_recognizer: Box::new(StubTextRecognizer),
            face_encoder: Box::new(HistogramFaceEncoder::new()),
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Result<Self> {
        match settings.kind {
            BackendKind::Stub => Ok(Self::stub()),
            BackendKind::Tract => Self::tract(settings),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn tract(settings: &BackendSettings) -> Result<Self> {
        use super::backends::{TractFaceEncoder, TractObjectDetector, TractTextRecognizer};

        let required = |path: &Option<std::path::PathBuf>, what: &str| {
            path.clone()
                .ok_or_else(|| anyhow!("backend 'tract' requires models.{} to be set", what))
        };
        let size = settings.detector_input_size;

        let bag_detector = TractObjectDetector::new(
            required(&settings.bag_model, "bag")?,
            settings.bag_labels.clone(),
            size,
        )?;
        let plate_detector = TractObjectDetector::new(
            required(&settings.plate_model, "plate")?,
            settings.plate_labels.clone(),
            size,
        )?;
        let text_recognizer = TractTextRecognizer::new(
            required(&settings.ocr_model, "ocr")?,
            &settings.ocr_charset,
            settings.ocr_input_height,
            settings.ocr_input_width,
        )?;
        let face_detector = TractObjectDetector::new(
            required(&settings.face_detector_model, "face_detector")?,
            vec!["face".to_string()],
            size,
        )?;
        let face_encoder = TractFaceEncoder::new(
            face_detector,
            required(&settings.face_embedder_model, "face_embedder")?,
            settings.face_embed_size,
        )?;

        Ok(Self {
            bag_detector: Box::new(bag_detector),
            plate_detector: Box::new(plate_detector),
            text_recognizer: Box::new(text_recognizer),
            face_encoder: Box::new(face_encoder),
        })
    }

    #[cfg(not(feature = "backend-tract"))]
    fn tract(_settings: &BackendSettings) -> Result<Self> {
        Err(anyhow!(
            "backend 'tract' requires building with the backend-tract feature"
        ))
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.bag_detector.warm_up()?;
        self.plate_detector.warm_up()?;
        self.text_recognizer.warm_up()?;
        self.face_encoder.warm_up()
    }

    /// Whether face events would come from a stand-in encoder rather than a model.
    pub fn synthetic_faces(&self) -> bool {
        self.face_encoder.is_synthetic()
    }

    /// Backend names, for the startup log line.
    pub fn describe(&self) -> String {
        format!(
            "bags={} plates={} ocr={} faces={}",
            self.bag_detector.name(),
            self.plate_detector.name(),
            self.text_recognizer.name(),
            self.face_encoder.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SentinelConfig;

    #[test]
    fn stub_backends_report_synthetic_faces() {
        let backends = InferenceBackends::from_settings(&SentinelConfig::default().backend).unwrap();
        assert!(backends.synthetic_faces());
        assert_eq!(
            backends.describe(),
            "bags=stub plates=stub ocr=stub faces=histogram"
        );
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_requires_feature() {
        let settings = BackendSettings {
            kind: BackendKind::Tract,
            ..SentinelConfig::default().backend
        };
        assert!(InferenceBackends::from_settings(&settings).is_err());
    }
}
