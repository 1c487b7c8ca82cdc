use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::detect::{Detection, InferenceBackends};
use crate::error::{InferenceError, PersistenceError, SentinelError};
use crate::events::{EventBuilder, EventCounts};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::matching::MatchingPolicy;
use crate::registry::EntityRegistry;
use crate::storage::{CommitReceipt, PersistenceSink};

use super::stages::{run_stage, BagStage, DetectionStage, FaceStage, PlateStage, StageOutcome};
use super::StageKind;

/// The three stages one run drives, in build order.
pub struct Stages {
    pub bag: Box<dyn DetectionStage>,
    pub plate: Box<dyn DetectionStage>,
    pub face: Box<dyn DetectionStage>,
}

impl Stages {
    pub fn new(
        bag: Box<dyn DetectionStage>,
        plate: Box<dyn DetectionStage>,
        face: Box<dyn DetectionStage>,
    ) -> Self {
        Self { bag, plate, face }
    }

    pub fn from_backends(backends: InferenceBackends, bag_label: &str, plate_label: &str) -> Self {
        let InferenceBackends {
            bag_detector,
            plate_detector,
            text_recognizer,
            face_encoder,
        } = backends;
        Self::new(
            Box::new(BagStage::new(bag_detector, bag_label)),
            Box::new(PlateStage::new(plate_detector, text_recognizer, plate_label)),
            Box::new(FaceStage::new(face_encoder)),
        )
    }
}

/// Why the frame loop stopped without a fatal error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The source ran out of frames.
    Drained,
    /// The stop flag was raised; the frame in flight was committed first.
    Cancelled,
    /// Decoding failed mid-stream. Frames before `frame_index` are committed.
    SourceError { frame_index: u64, message: String },
}

/// Frames on which each stage failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageFailures {
    pub bag: u64,
    pub plate: u64,
    pub face: u64,
}

impl StageFailures {
    pub fn record(&mut self, kind: StageKind) {
        match kind {
            StageKind::Bag => self.bag += 1,
            StageKind::Plate => self.plate += 1,
            StageKind::Face => self.face += 1,
        }
    }

    pub fn get(&self, kind: StageKind) -> u64 {
        match kind {
            StageKind::Bag => self.bag,
            StageKind::Plate => self.plate,
            StageKind::Face => self.face,
        }
    }

    pub fn total(&self) -> u64 {
        self.bag + self.plate + self.face
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub source: String,
    pub frames_processed: u64,
    pub events: EventCounts,
    pub stage_failures: StageFailures,
    pub termination: Termination,
}

/// Drives frames from a source through the stages into a sink.
pub struct Orchestrator<'r> {
    registry: &'r EntityRegistry,
    policy: MatchingPolicy,
    builder: EventBuilder,
    parallel_stages: bool,
    stop: Arc<AtomicBool>,
}

impl<'r> Orchestrator<'r> {
    pub fn new(registry: &'r EntityRegistry, policy: MatchingPolicy, builder: EventBuilder) -> Self {
        Self {
            registry,
            policy,
            builder,
            parallel_stages: false,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the three stages of a frame on scoped threads.
    pub fn with_parallel_stages(mut self, parallel: bool) -> Self {
        self.parallel_stages = parallel;
        self
    }

    /// Share an externally owned stop flag (e.g. set from a signal handler).
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        stages: &mut Stages,
        sink: &mut dyn PersistenceSink,
    ) -> Result<RunSummary, SentinelError> {
        self.run_with_observer(source, stages, sink, &mut |_| {})
    }

    /// Like [`Orchestrator::run`], calling `observer` after every committed frame.
    pub fn run_with_observer(
        &self,
        source: &mut dyn FrameSource,
        stages: &mut Stages,
        sink: &mut dyn PersistenceSink,
        observer: &mut dyn FnMut(&CommitReceipt),
    ) -> Result<RunSummary, SentinelError> {
        let description = source.describe();
        log::info!(
            "processing {} (camera {}, parallel stages: {})",
            description,
            self.builder.camera_id(),
            self.parallel_stages
        );

        let mut frames_processed = 0u64;
        let mut events = EventCounts::default();
        let mut stage_failures = StageFailures::default();

        let termination = loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("stop requested after {} frame(s)", frames_processed);
                break Termination::Cancelled;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Termination::Drained,
                Err(err) => {
                    log::error!("{}: {}", description, err);
                    break Termination::SourceError {
                        frame_index: err.frame_index,
                        message: err.message,
                    };
                }
            };

            let receipt = self.process_frame(&frame, stages, sink, &mut stage_failures)?;
            frames_processed += 1;
            events.add(&receipt.counts);
            observer(&receipt);
        };

        log::info!(
            "{}: {} frame(s), {} bag / {} vehicle / {} face event(s), {} stage failure(s)",
            description,
            frames_processed,
            events.gunny_bag_events,
            events.vehicle_logs,
            events.face_logs,
            stage_failures.total()
        );
        Ok(RunSummary {
            source: description,
            frames_processed,
            events,
            stage_failures,
            termination,
        })
    }

    /// Detect, match, build and commit one frame.
    ///
    /// Stage failures are logged and counted in `failures`; the other stages' events
    /// are still committed. Lookup and commit failures are fatal and leave nothing
    /// from this frame in the sink.
    pub fn process_frame(
        &self,
        frame: &Frame,
        stages: &mut Stages,
        sink: &mut dyn PersistenceSink,
        failures: &mut StageFailures,
    ) -> Result<CommitReceipt, SentinelError> {
        let stamp = frame.stamp();
        let outcomes = self.detect(frame, stages);
        for outcome in &outcomes {
            if let StageOutcome::Failed(err) = outcome {
                log::warn!("frame {}: {}", stamp.index, err);
                failures.record(err.stage);
            }
        }

        let mut tx = sink.begin_frame(stamp);
        let persistence = |source: PersistenceError| SentinelError::Persistence {
            frame_index: stamp.index,
            source,
        };
        for detection in outcomes.iter().flat_map(StageOutcome::detections) {
            let event = match detection {
                Detection::Bag(bags) if bags.count == 0 => continue,
                Detection::Bag(bags) => self.builder.bag_event(stamp, bags),
                Detection::Plate(plate) => {
                    let decision = self
                        .policy
                        .match_plate(plate, self.registry)
                        .map_err(|e| SentinelError::RegistryLookup {
                            frame_index: stamp.index,
                            message: format!("{:#}", e),
                        })?;
                    self.builder.vehicle_event(stamp, plate, &decision)
                }
                Detection::Face(face) => {
                    let decision = self.policy.match_face(face, self.registry);
                    self.builder.face_event(stamp, face, &decision)
                }
            };
            tx.append(event).map_err(persistence)?;
        }
        tx.commit().map_err(persistence)
    }

    fn detect(&self, frame: &Frame, stages: &mut Stages) -> [StageOutcome; 3] {
        let Stages { bag, plate, face } = stages;
        if !self.parallel_stages {
            return [
                run_stage(bag.as_mut(), frame),
                run_stage(plate.as_mut(), frame),
                run_stage(face.as_mut(), frame),
            ];
        }
        thread::scope(|scope| {
            let bag_handle = scope.spawn(move || run_stage(bag.as_mut(), frame));
            let plate_handle = scope.spawn(move || run_stage(plate.as_mut(), frame));
            let face_outcome = run_stage(face.as_mut(), frame);
            [
                joined(bag_handle, StageKind::Bag),
                joined(plate_handle, StageKind::Plate),
                face_outcome,
            ]
        })
    }
}

fn joined(handle: thread::ScopedJoinHandle<'_, StageOutcome>, kind: StageKind) -> StageOutcome {
    handle.join().unwrap_or_else(|_| {
        StageOutcome::Failed(InferenceError::new(kind, "stage thread panicked"))
    })
}
