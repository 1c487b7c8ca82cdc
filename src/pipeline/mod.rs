//! Detection stages and the frame loop.
//!
//! Per frame: read, detect (three independent stages), match, build, commit.
//! A stage failure is contained to that stage on that frame.

mod orchestrator;
mod stages;

pub use orchestrator::{Orchestrator, RunSummary, StageFailures, Stages, Termination};
pub use stages::{run_stage, BagStage, DetectionStage, FaceStage, PlateStage, StageOutcome};

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Bag,
    Plate,
    Face,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Bag, StageKind::Plate, StageKind::Face];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Bag => "bag",
            StageKind::Plate => "plate",
            StageKind::Face => "face",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
