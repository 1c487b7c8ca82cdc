use gate_sentinel::detect::backends::{
    ScriptedFaceEncoder, ScriptedObjectDetector, ScriptedTextRecognizer,
};
use gate_sentinel::detect::{FaceRegion, InferenceBackends, ObjectBox};
use gate_sentinel::{
    shared_memory_uri, BoundingBox, Embedding, EntityRegistry, Event, EventBuilder, FaceStatus,
    Frame, InMemoryEventStore, InMemoryReferences, MatchingPolicy, MemorySource, Orchestrator,
    PersistenceSink, Person, PlateStatus, SentinelError, SqliteEventStore, SqliteReferenceStore,
    Stages, Termination, Vehicle, VehicleRegistry, VehicleType,
};

const BASE_TS: i64 = 1_700_000_000_000;

fn frame(index: u64) -> Frame {
    Frame::new(index, BASE_TS + index as i64 * 100, 64, 48, vec![0u8; 64 * 48 * 3]).unwrap()
}

fn frames(n: u64) -> MemorySource {
    MemorySource::from_frames("scenario", (0..n).map(frame).collect())
}

fn boxes(label: &str, n: usize, score: f32) -> Vec<ObjectBox> {
    (0..n)
        .map(|i| ObjectBox {
            bbox: BoundingBox::new(2.0 + i as f32 * 10.0, 2.0, 10.0 + i as f32 * 10.0, 12.0),
            label: label.to_string(),
            score,
        })
        .collect()
}

fn face_at(values: Vec<f32>) -> FaceRegion {
    FaceRegion {
        bbox: BoundingBox::new(0.0, 0.0, 16.0, 16.0),
        score: 0.93,
        embedding: Embedding::new(values),
    }
}

fn person(id: i64, name: &str, values: Vec<f32>) -> Person {
    Person {
        id: Some(id),
        name: name.to_string(),
        role: Some("Loader".to_string()),
        authorized: true,
        embedding: Embedding::new(values),
    }
}

fn stages(
    bags: ScriptedObjectDetector,
    plates: ScriptedObjectDetector,
    ocr: ScriptedTextRecognizer,
    faces: ScriptedFaceEncoder,
) -> Stages {
    Stages::from_backends(
        InferenceBackends {
            bag_detector: Box::new(bags),
            plate_detector: Box::new(plates),
            text_recognizer: Box::new(ocr),
            face_encoder: Box::new(faces),
        },
        "gunny bag",
        "plate",
    )
}

fn in_memory_registry() -> EntityRegistry {
    EntityRegistry::new(
        vec![person(1, "Ravi", vec![0.0, 0.0]), person(2, "Asha", vec![1.0, 0.0])],
        Box::new(
            InMemoryReferences::new()
                .with_vehicle("KA01AB1234", VehicleType::Truck, true)
                .with_vehicle("KA05XY0001", VehicleType::Van, false),
        ),
    )
}

/// Vehicle table that cannot be reached.
struct OfflineVehicles;

impl VehicleRegistry for OfflineVehicles {
    fn lookup_vehicle(&self, _plate: &str) -> anyhow::Result<Option<Vehicle>> {
        Err(anyhow::anyhow!("vehicles table is locked"))
    }
}

fn orchestrator(registry: &EntityRegistry) -> Orchestrator<'_> {
    Orchestrator::new(
        registry,
        MatchingPolicy::new(0.6).unwrap(),
        EventBuilder::new("CAM-1", "AutoZone", 50.0).unwrap(),
    )
}

#[test]
fn authorized_plate_is_logged_through_sqlite() {
    let uri = shared_memory_uri();
    let references = SqliteReferenceStore::open_or_create(&uri).unwrap();
    references
        .add_vehicle("KA01 AB1234", &VehicleType::Truck, true)
        .unwrap();
    let registry = EntityRegistry::new(Vec::new(), Box::new(references));
    let mut sink = SqliteEventStore::open(&uri).unwrap();

    let mut stages = stages(
        ScriptedObjectDetector::new(),
        ScriptedObjectDetector::new().emit(0, boxes("number_plate", 1, 0.9)),
        ScriptedTextRecognizer::new().then_read("KA01 AB1234"),
        ScriptedFaceEncoder::new(),
    );
    let summary = orchestrator(&registry)
        .run(&mut frames(1), &mut stages, &mut sink)
        .unwrap();
    assert_eq!(summary.termination, Termination::Drained);

    let logs = sink.vehicle_logs().unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0].event;
    assert_eq!(log.plate, "KA01AB1234");
    assert_eq!(log.status, PlateStatus::Authorized);
    assert!((log.confidence - 90.0).abs() < 1e-3);
    assert_eq!(log.camera_id, "CAM-1");
    assert_eq!(log.timestamp_ms, BASE_TS);
}

#[test]
fn unknown_plate_is_unauthorized() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    let mut stages = stages(
        ScriptedObjectDetector::new(),
        ScriptedObjectDetector::new().emit(0, boxes("plate", 2, 0.8)),
        ScriptedTextRecognizer::new()
            .then_read("ZZ 99 ZZ 0000")
            .then_read("ka05xy0001"),
        ScriptedFaceEncoder::new(),
    );
    orchestrator(&registry)
        .run(&mut frames(1), &mut stages, &mut sink)
        .unwrap();

    let plates: Vec<_> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::VehicleLog(v) => Some((v.plate.as_str(), v.status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        plates,
        vec![
            ("ZZ99ZZ0000", PlateStatus::Unauthorized),
            ("KA05XY0001", PlateStatus::Unauthorized),
        ]
    );
}

#[test]
fn nearest_face_within_threshold_is_verified() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    let mut stages = stages(
        ScriptedObjectDetector::new(),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new().emit(0, vec![face_at(vec![0.9, 0.1])]),
    );
    orchestrator(&registry)
        .run(&mut frames(1), &mut stages, &mut sink)
        .unwrap();

    let Event::FaceLog(face) = &sink.events()[0] else {
        panic!("expected a face event");
    };
    assert_eq!(face.status, FaceStatus::Verified);
    assert_eq!(face.person_id, Some(2));
    assert!((face.confidence - 93.0).abs() < 1e-3);
}

#[test]
fn face_beyond_threshold_is_intrusion() {
    let uri = shared_memory_uri();
    let mut sink = SqliteEventStore::open(&uri).unwrap();
    let registry = in_memory_registry();
    let mut stages = stages(
        ScriptedObjectDetector::new(),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new().emit(0, vec![face_at(vec![4.0, 4.0]), face_at(vec![0.05, 0.0])]),
    );
    orchestrator(&registry)
        .run(&mut frames(1), &mut stages, &mut sink)
        .unwrap();

    let faces = sink.face_logs().unwrap();
    assert_eq!(faces.len(), 2);
    assert_eq!(faces[0].event.status, FaceStatus::Intrusion);
    assert_eq!(faces[0].event.person_id, None);
    assert_eq!(faces[1].event.status, FaceStatus::Verified);
    assert_eq!(faces[1].event.person_id, Some(1));
}

#[test]
fn three_bags_make_one_event() {
    let registry = in_memory_registry();
    let mut sink = SqliteEventStore::open(":memory:").unwrap();
    let mut detections = boxes("gunny bag", 3, 0.7);
    detections.extend(boxes("person", 2, 0.9));
    let mut stages = stages(
        ScriptedObjectDetector::new().emit(0, detections),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new(),
    );
    let summary = orchestrator(&registry)
        .run(&mut frames(2), &mut stages, &mut sink)
        .unwrap();
    assert_eq!(summary.events.gunny_bag_events, 1);

    let bags = sink.gunny_bag_events().unwrap();
    assert_eq!(bags.len(), 1);
    assert_eq!(bags[0].event.bag_count, 3);
    assert_eq!(bags[0].event.estimated_volume, 150.0);
    assert_eq!(bags[0].event.zone, "AutoZone");
    assert_eq!(bags[0].event.frame_index, 0);
}

#[test]
fn plate_failure_on_one_frame_keeps_other_events() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    let plate_detector = ScriptedObjectDetector::new()
        .emit(0, boxes("plate", 1, 0.9))
        .fail(1, "detector timeout")
        .emit(2, boxes("plate", 1, 0.9));
    let mut stages = stages(
        ScriptedObjectDetector::new().emit(1, boxes("gunny bag", 2, 0.8)),
        plate_detector,
        ScriptedTextRecognizer::new()
            .then_read("KA01AB1234")
            .then_read("KA01AB1234"),
        ScriptedFaceEncoder::new().emit(1, vec![face_at(vec![0.0, 0.1])]),
    );
    let summary = orchestrator(&registry)
        .run(&mut frames(3), &mut stages, &mut sink)
        .unwrap();

    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.stage_failures.plate, 1);
    assert_eq!(summary.stage_failures.bag, 0);
    assert_eq!(summary.events.vehicle_logs, 2);

    let frame_one: Vec<&Event> = sink
        .events()
        .iter()
        .filter(|e| e.frame_index() == 1)
        .collect();
    assert_eq!(frame_one.len(), 2);
    assert!(matches!(frame_one[0], Event::GunnyBag(_)));
    assert!(matches!(frame_one[1], Event::FaceLog(_)));
}

#[test]
fn failed_commit_aborts_and_keeps_nothing_from_the_frame() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    sink.fail_next_commit();
    let mut stages = stages(
        ScriptedObjectDetector::new().emit(0, boxes("gunny bag", 1, 0.8)),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new().emit(0, vec![face_at(vec![0.0, 0.0])]),
    );
    let err = orchestrator(&registry)
        .run(&mut frames(2), &mut stages, &mut sink)
        .unwrap_err();
    assert!(matches!(err, SentinelError::Persistence { frame_index: 0, .. }));
    assert!(!err.is_startup());
    assert!(sink.events().is_empty());
}

#[test]
fn failed_commit_keeps_earlier_frames() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    sink.fail_commit_at(2);
    let mut stages = stages(
        ScriptedObjectDetector::new()
            .emit(0, boxes("gunny bag", 1, 0.8))
            .emit(1, boxes("gunny bag", 2, 0.8))
            .emit(2, boxes("gunny bag", 3, 0.8))
            .emit(3, boxes("gunny bag", 4, 0.8)),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new().emit(2, vec![face_at(vec![0.0, 0.0])]),
    );
    let err = orchestrator(&registry)
        .run(&mut frames(4), &mut stages, &mut sink)
        .unwrap_err();
    assert!(matches!(err, SentinelError::Persistence { frame_index: 2, .. }));

    let kept: Vec<(u64, u32)> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::GunnyBag(b) => Some((b.frame_index, b.bag_count)),
            _ => None,
        })
        .collect();
    assert_eq!(kept, vec![(0, 1), (1, 2)]);
    assert_eq!(sink.events().len(), 2);
}

#[test]
fn vehicle_lookup_failure_aborts_without_the_frame() {
    let registry = EntityRegistry::new(Vec::new(), Box::new(OfflineVehicles));
    let mut sink = InMemoryEventStore::new();
    let mut stages = stages(
        ScriptedObjectDetector::new()
            .emit(0, boxes("gunny bag", 1, 0.8))
            .emit(1, boxes("gunny bag", 2, 0.8)),
        ScriptedObjectDetector::new().emit(1, boxes("plate", 1, 0.9)),
        ScriptedTextRecognizer::new().then_read("KA01AB1234"),
        ScriptedFaceEncoder::new(),
    );
    let err = orchestrator(&registry)
        .run(&mut frames(3), &mut stages, &mut sink)
        .unwrap_err();
    match &err {
        SentinelError::RegistryLookup {
            frame_index,
            message,
        } => {
            assert_eq!(*frame_index, 1);
            assert!(message.contains("locked"), "{}", message);
        }
        other => panic!("expected a lookup failure, got {:?}", other),
    }
    assert!(!err.is_startup());
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.events()[0].frame_index(), 0);
}

#[test]
fn decode_failure_ends_run_with_committed_prefix() {
    let registry = in_memory_registry();
    let mut sink = InMemoryEventStore::new();
    let mut source = MemorySource::new("truncated");
    source.push_frame(frame(0));
    source.push_frame(frame(1));
    source.push_error(2, "corrupt packet");
    source.push_frame(frame(3));
    let mut stages = stages(
        ScriptedObjectDetector::new()
            .emit(0, boxes("gunny bag", 1, 0.8))
            .emit(3, boxes("gunny bag", 1, 0.8)),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new(),
    );
    let summary = orchestrator(&registry)
        .run(&mut source, &mut stages, &mut sink)
        .unwrap();

    assert_eq!(summary.frames_processed, 2);
    assert_eq!(
        summary.termination,
        Termination::SourceError {
            frame_index: 2,
            message: "corrupt packet".to_string()
        }
    );
    assert_eq!(sink.counts().unwrap().gunny_bag_events, 1);
}

#[test]
fn parallel_stages_match_sequential_output() {
    let registry = in_memory_registry();
    let script = || {
        stages(
            ScriptedObjectDetector::new().emit(0, boxes("gunny bag", 2, 0.8)),
            ScriptedObjectDetector::new().emit(0, boxes("plate", 1, 0.9)),
            ScriptedTextRecognizer::new().then_read("KA01AB1234"),
            ScriptedFaceEncoder::new().emit(0, vec![face_at(vec![1.0, 0.1])]),
        )
    };

    let mut sequential = InMemoryEventStore::new();
    orchestrator(&registry)
        .run(&mut frames(1), &mut script(), &mut sequential)
        .unwrap();
    let mut parallel = InMemoryEventStore::new();
    orchestrator(&registry)
        .with_parallel_stages(true)
        .run(&mut frames(1), &mut script(), &mut parallel)
        .unwrap();

    assert_eq!(sequential.events(), parallel.events());
    assert_eq!(parallel.events().len(), 3);
}

#[test]
fn event_log_is_append_only() {
    let registry = in_memory_registry();
    let mut sink = SqliteEventStore::open(":memory:").unwrap();
    let mut stages = stages(
        ScriptedObjectDetector::new().emit(0, boxes("gunny bag", 1, 0.8)),
        ScriptedObjectDetector::new(),
        ScriptedTextRecognizer::new(),
        ScriptedFaceEncoder::new().emit(0, vec![face_at(vec![9.0, 9.0])]),
    );
    orchestrator(&registry)
        .run(&mut frames(1), &mut stages, &mut sink)
        .unwrap();

    let conn = sink.connection();
    assert!(conn.execute("DELETE FROM gunny_bag_events", []).is_err());
    assert!(conn
        .execute("UPDATE face_logs SET status = 'Verified', user_id = 1", [])
        .is_err());
    let counts = sink.counts().unwrap();
    assert_eq!(counts.gunny_bag_events, 1);
    assert_eq!(counts.face_logs, 1);
}
