//! Scripted backends that replay canned outputs or failures.
//!
//! Object detectors and face encoders are keyed by frame index; frames without a
//! script entry yield nothing. The text recognizer answers calls in order.

use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceEncoder, ObjectDetector, TextRecognizer};
use crate::detect::result::{FaceRegion, ObjectBox, TextReading};
use crate::frame::{Frame, FrameCrop};

/// One scripted answer.
#[derive(Clone, Debug)]
pub enum ScriptStep<T> {
    Emit(Vec<T>),
    Fail(String),
}

impl<T: Clone> ScriptStep<T> {
    fn play(&self) -> Result<Vec<T>> {
        match self {
            ScriptStep::Emit(items) => Ok(items.clone()),
            ScriptStep::Fail(message) => Err(anyhow!("{}", message)),
        }
    }
}

#[derive(Default)]
pub struct ScriptedObjectDetector {
    by_frame: HashMap<u64, ScriptStep<ObjectBox>>,
}

impl ScriptedObjectDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(mut self, frame_index: u64, boxes: Vec<ObjectBox>) -> Self {
        self.by_frame.insert(frame_index, ScriptStep::Emit(boxes));
        self
    }

    pub fn fail(mut self, frame_index: u64, message: &str) -> Self {
        self.by_frame
            .insert(frame_index, ScriptStep::Fail(message.to_string()));
        self
    }
}

impl ObjectDetector for ScriptedObjectDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect_objects(&mut self, frame: &Frame) -> Result<Vec<ObjectBox>> {
        match self.by_frame.get(&frame.index) {
            Some(step) => step.play(),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct ScriptedTextRecognizer {
    queue: VecDeque<ScriptStep<TextReading>>,
}

impl ScriptedTextRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the readings for the next call; an empty string means "no text".
    pub fn then_read(mut self, text: &str) -> Self {
        let readings = if text.is_empty() {
            Vec::new()
        } else {
            vec![TextReading {
                text: text.to_string(),
                score: 0.9,
            }]
        };
        self.queue.push_back(ScriptStep::Emit(readings));
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.queue.push_back(ScriptStep::Fail(message.to_string()));
        self
    }
}

impl TextRecognizer for ScriptedTextRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn read_text(&mut self, _crop: &FrameCrop) -> Result<Vec<TextReading>> {
        match self.queue.pop_front() {
            Some(step) => step.play(),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct ScriptedFaceEncoder {
    by_frame: HashMap<u64, ScriptStep<FaceRegion>>,
}

impl ScriptedFaceEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(mut self, frame_index: u64, faces: Vec<FaceRegion>) -> Self {
        self.by_frame.insert(frame_index, ScriptStep::Emit(faces));
        self
    }

    pub fn fail(mut self, frame_index: u64, message: &str) -> Self {
        self.by_frame
            .insert(frame_index, ScriptStep::Fail(message.to_string()));
        self
    }
}

impl FaceEncoder for ScriptedFaceEncoder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn encode_faces(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        match self.by_frame.get(&frame.index) {
            Some(step) => step.play(),
            None => Ok(Vec::new()),
        }
    }
}
