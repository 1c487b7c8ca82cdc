#![cfg(feature = "backend-tract")]

//! Tract-based ONNX backends.
//!
//! Models are loaded from local files and run on the CPU. No backend performs
//! network I/O or writes to disk beyond model loading.
//!
//! - `TractObjectDetector`: YOLO-style head (`[1, 4 + classes, N]` or
//!   `[1, N, 4 + classes]`, boxes as centre/size in input pixels), confidence
//!   filter and per-class IoU suppression.
//! - `TractTextRecognizer`: CTC recognizer (`[1, T, C]`, blank at index 0),
//!   greedy decoding.
//! - `TractFaceEncoder`: face-region detector plus an embedding model
//!   (`[1, D]` output, L2-normalized).

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::{FaceEncoder, ObjectDetector, TextRecognizer};
use crate::detect::result::{Embedding, FaceRegion, ObjectBox, TextReading};
use crate::frame::{BoundingBox, Frame, FrameCrop};

type OnnxPlan = TypedRunnableModel<TypedModel>;

fn load_plan(model_path: &Path, height: u32, width: u32) -> Result<OnnxPlan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn rgb_tensor(image: &image::RgbImage, mean: f32, std: f32) -> Tensor {
    let (width, height) = image.dimensions();
    let input = tract_ndarray::Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, channel, y, x)| {
            let value = image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0;
            (value - mean) / std
        },
    );
    input.into_tensor()
}

fn first_output(outputs: &TVec<TValue>) -> Result<&TValue> {
    outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))
}

// ----------------------------------------------------------------------------
// Object detection
// ----------------------------------------------------------------------------

pub struct TractObjectDetector {
    model: OnnxPlan,
    labels: Vec<String>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractObjectDetector {
    /// Load a square-input detector. `labels` are the class names in model order.
    pub fn new<P: AsRef<Path>>(model_path: P, labels: Vec<String>, input_size: u32) -> Result<Self> {
        if labels.is_empty() {
            bail!("object detector needs at least one class label");
        }
        let model = load_plan(model_path.as_ref(), input_size, input_size)?;
        Ok(Self {
            model,
            labels,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn decode(&self, output: &TValue, scale_x: f32, scale_y: f32) -> Result<Vec<ObjectBox>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("detector output must be rank 3")?;
        let attrs = 4 + self.labels.len();
        let shape = view.shape();
        let (count, channel_first) = if shape[1] == attrs {
            (shape[2], true)
        } else if shape[2] == attrs {
            (shape[1], false)
        } else {
            bail!(
                "detector output {:?} does not match {} classes",
                shape,
                self.labels.len()
            );
        };
        let at = |i: usize, a: usize| {
            if channel_first {
                view[[0, a, i]]
            } else {
                view[[0, i, a]]
            }
        };

        let mut candidates = Vec::new();
        for i in 0..count {
            let (class, score) = (0..self.labels.len())
                .map(|c| (c, at(i, 4 + c)))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !(score >= self.confidence_threshold) {
                continue;
            }
            let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
            candidates.push((
                class,
                score,
                BoundingBox::new(
                    (cx - w / 2.0) * scale_x,
                    (cy - h / 2.0) * scale_y,
                    (cx + w / 2.0) * scale_x,
                    (cy + h / 2.0) * scale_y,
                ),
            ));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for cand in candidates {
            let suppressed = kept
                .iter()
                .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > self.iou_threshold);
            if !suppressed {
                kept.push(cand);
            }
        }

        Ok(kept
            .into_iter()
            .map(|(class, score, bbox)| ObjectBox {
                bbox,
                label: self.labels[class].clone(),
                score: score.clamp(0.0, 1.0),
            })
            .collect())
    }
}

impl ObjectDetector for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>> {
        let image = frame.to_rgb_image()?;
        let resized =
            image::imageops::resize(&image, self.input_size, self.input_size, FilterType::Triangle);
        let outputs = self
            .model
            .run(tvec!(rgb_tensor(&resized, 0.0, 1.0).into()))
            .context("ONNX inference failed")?;
        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;
        self.decode(first_output(&outputs)?, scale_x, scale_y)
    }
}

// ----------------------------------------------------------------------------
// Text recognition
// ----------------------------------------------------------------------------

pub struct TractTextRecognizer {
    model: OnnxPlan,
    charset: Vec<char>,
    input_height: u32,
    input_width: u32,
}

impl TractTextRecognizer {
    /// `charset` maps class `i + 1` to `charset[i]`; class 0 is the CTC blank.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        charset: &str,
        input_height: u32,
        input_width: u32,
    ) -> Result<Self> {
        let charset: Vec<char> = charset.chars().collect();
        if charset.is_empty() {
            bail!("text recognizer needs a non-empty charset");
        }
        let model = load_plan(model_path.as_ref(), input_height, input_width)?;
        Ok(Self {
            model,
            charset,
            input_height,
            input_width,
        })
    }

    fn decode(&self, output: &TValue) -> Result<Option<TextReading>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("recognizer output must be rank 3")?;
        let (steps, classes) = (view.shape()[1], view.shape()[2]);

        let mut text = String::new();
        let mut scores = Vec::new();
        let mut previous = 0usize;
        for t in 0..steps {
            let row: Vec<f32> = (0..classes).map(|c| view[[0, t, c]]).collect();
            let (best, prob) = softmax_argmax(&row);
            if best != 0 && best != previous {
                let ch = self
                    .charset
                    .get(best - 1)
                    .ok_or_else(|| anyhow!("class {} is outside the charset", best))?;
                text.push(*ch);
                scores.push(prob);
            }
            previous = best;
        }

        if text.is_empty() {
            return Ok(None);
        }
        let score = scores.iter().sum::<f32>() / scores.len() as f32;
        Ok(Some(TextReading { text, score }))
    }
}

fn softmax_argmax(row: &[f32]) -> (usize, f32) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = row.iter().map(|v| (v - max).exp()).sum();
    let (best, value) = row
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    let prob = if sum > 0.0 { (value - max).exp() / sum } else { 0.0 };
    (best, prob)
}

impl TextRecognizer for TractTextRecognizer {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn read_text(&mut self, crop: &FrameCrop) -> Result<Vec<TextReading>> {
        let image = crop.to_rgb_image()?;
        let resized = image::imageops::resize(
            &image,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let outputs = self
            .model
            .run(tvec!(rgb_tensor(&resized, 0.5, 0.5).into()))
            .context("ONNX inference failed")?;
        Ok(self.decode(first_output(&outputs)?)?.into_iter().collect())
    }
}

// ----------------------------------------------------------------------------
// Face embedding
// ----------------------------------------------------------------------------

pub struct TractFaceEncoder {
    detector: TractObjectDetector,
    embedder: OnnxPlan,
    embed_size: u32,
}

impl TractFaceEncoder {
    pub fn new<P: AsRef<Path>>(
        detector: TractObjectDetector,
        embedder_path: P,
        embed_size: u32,
    ) -> Result<Self> {
        let embedder = load_plan(embedder_path.as_ref(), embed_size, embed_size)?;
        Ok(Self {
            detector,
            embedder,
            embed_size,
        })
    }

    fn embed(&self, crop: &FrameCrop) -> Result<Embedding> {
        let image = crop.to_rgb_image()?;
        let resized =
            image::imageops::resize(&image, self.embed_size, self.embed_size, FilterType::Triangle);
        let outputs = self
            .embedder
            .run(tvec!(rgb_tensor(&resized, 0.5, 0.5).into()))
            .context("ONNX embedding failed")?;
        let values: Vec<f32> = first_output(&outputs)?
            .to_array_view::<f32>()
            .context("embedding tensor was not f32")?
            .iter()
            .copied()
            .collect();
        if values.is_empty() {
            bail!("embedding model produced an empty vector");
        }
        Ok(Embedding::new(values).normalized())
    }
}

impl FaceEncoder for TractFaceEncoder {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn encode_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        let boxes = self.detector.detect_objects(frame)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for found in boxes {
            let crop = match frame.crop(&found.bbox) {
                Ok(crop) => crop,
                Err(e) => {
                    log::debug!("skipping face region: {}", e);
                    continue;
                }
            };
            faces.push(FaceRegion {
                bbox: found.bbox,
                score: found.score,
                embedding: self.embed(&crop)?,
            });
        }
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::softmax_argmax;

    #[test]
    fn softmax_argmax_picks_largest_logit() {
        let (idx, prob) = softmax_argmax(&[0.0, 2.0, 1.0]);
        assert_eq!(idx, 1);
        assert!(prob > 0.5 && prob < 1.0);
    }
}
