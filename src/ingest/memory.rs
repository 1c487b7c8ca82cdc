use std::collections::VecDeque;

use crate::error::SourceReadError;
use crate::frame::Frame;

use super::FrameSource;

/// Scripted in-memory source. Replays queued frames and read failures in order.
#[derive(Default)]
pub struct MemorySource {
    queue: VecDeque<Result<Frame, SourceReadError>>,
    name: String,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            queue: VecDeque::new(),
            name: name.to_string(),
        }
    }

    pub fn from_frames(name: &str, frames: Vec<Frame>) -> Self {
        Self {
            queue: frames.into_iter().map(Ok).collect(),
            name: name.to_string(),
        }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.queue.push_back(Ok(frame));
    }

    /// Queue a decode failure. The source reports it once and is then drained.
    pub fn push_error(&mut self, frame_index: u64, message: &str) {
        self.queue
            .push_back(Err(SourceReadError::new(frame_index, message)));
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceReadError> {
        match self.queue.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => {
                self.queue.clear();
                Err(err)
            }
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }
}
