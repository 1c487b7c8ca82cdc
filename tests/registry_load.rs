use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::tempdir;

use gate_sentinel::detect::{
    FaceEncoder, FaceRegion, HistogramFaceEncoder, InferenceBackends,
};
use gate_sentinel::{
    shared_memory_uri, BoundingBox, EntityRegistry, EventBuilder, FaceDetection, FaceStatus,
    Frame, InMemoryEventStore, InMemoryReferences, MatchingPolicy, MemorySource, Orchestrator,
    RegistryLoadError, SqliteReferenceStore, Stages,
};

fn write_photo(dir: &Path, file: &str, color: [u8; 3]) {
    RgbImage::from_pixel(48, 48, Rgb(color))
        .save(dir.join(file))
        .expect("write photo");
}

fn write_split_photo(dir: &Path, file: &str, left: [u8; 3], right: [u8; 3]) {
    RgbImage::from_fn(48, 48, |x, _| if x < 24 { Rgb(left) } else { Rgb(right) })
        .save(dir.join(file))
        .expect("write photo");
}

/// Histogram encoder that finds no face in an all-black photo.
struct NoFaceInDark(HistogramFaceEncoder);

impl FaceEncoder for NoFaceInDark {
    fn name(&self) -> &'static str {
        "no-face-in-dark"
    }

    fn encode_faces(&mut self, frame: &Frame) -> anyhow::Result<Vec<FaceRegion>> {
        if frame.pixels().iter().all(|&v| v == 0) {
            return Ok(Vec::new());
        }
        self.0.encode_faces(frame)
    }
}

fn users() -> InMemoryReferences {
    InMemoryReferences::new()
        .with_user("alice", "Supervisor", true)
        .with_user("bob", "Loader", true)
}

#[test]
fn loads_photos_in_name_order_and_keeps_unknown_users_without_id() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "bob.png", [0, 0, 240]);
    write_photo(dir.path(), "alice.PNG", [240, 0, 0]);
    write_photo(dir.path(), "mallory.png", [0, 240, 0]);
    std::fs::write(dir.path().join("notes.txt"), "not a photo").unwrap();

    let mut encoder = HistogramFaceEncoder::new();
    let registry = EntityRegistry::load(
        dir.path(),
        &mut encoder,
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .unwrap();

    let names: Vec<_> = registry.persons().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "mallory"]);
    let ids: Vec<_> = registry.persons().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), None]);
    assert_eq!(registry.persons()[2].role, None);
}

#[test]
fn photos_without_faces_are_skipped() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "alice.png", [240, 0, 0]);
    write_photo(dir.path(), "bob.png", [0, 0, 0]);

    let registry = EntityRegistry::load(
        dir.path(),
        &mut NoFaceInDark(HistogramFaceEncoder::new()),
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .unwrap();

    let names: Vec<_> = registry.persons().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["alice"]);
}

#[test]
fn directory_where_no_photo_has_a_face_is_fatal() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "alice.png", [0, 0, 0]);
    let err = EntityRegistry::load(
        dir.path(),
        &mut NoFaceInDark(HistogramFaceEncoder::new()),
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RegistryLoadError::NoUsableEntries(_)));
}

#[test]
fn unregistered_lookalike_is_not_credited_to_a_user() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "alice.png", [240, 0, 0]);
    write_split_photo(dir.path(), "mallory.png", [240, 0, 0], [120, 0, 0]);

    let mut encoder = HistogramFaceEncoder::new();
    let registry = EntityRegistry::load(
        dir.path(),
        &mut encoder,
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .unwrap();

    let mallory = RgbImage::from_fn(48, 48, |x, _| {
        if x < 24 {
            Rgb([240, 0, 0])
        } else {
            Rgb([120, 0, 0])
        }
    });
    let region = encoder
        .encode_faces(&Frame::from_rgb_image(0, 0, mallory))
        .unwrap()
        .remove(0);
    let detection = FaceDetection {
        bbox: BoundingBox::new(0.0, 0.0, 48.0, 48.0),
        embedding: region.embedding,
        confidence: 100.0,
    };

    let m = MatchingPolicy::new(0.6)
        .unwrap()
        .match_face(&detection, &registry);
    assert_eq!(m.status, FaceStatus::Intrusion);
    assert!(m.person.is_none());
    assert_eq!(m.distance, Some(0.0));
}

#[test]
fn missing_directory_is_fatal() {
    let dir = tempdir().unwrap();
    let err = EntityRegistry::load(
        &dir.path().join("absent"),
        &mut HistogramFaceEncoder::new(),
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RegistryLoadError::MissingDirectory(_)));
}

#[test]
fn directory_without_images_is_fatal() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("readme.md"), "faces go here").unwrap();
    let err = EntityRegistry::load(
        dir.path(),
        &mut HistogramFaceEncoder::new(),
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RegistryLoadError::EmptyDirectory(_)));
}

#[test]
fn users_resolve_through_sqlite_store() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "alice.jpg", [240, 0, 0]);

    let uri = shared_memory_uri();
    let store = SqliteReferenceStore::open_or_create(&uri).unwrap();
    let id = store.add_user("alice", "Supervisor", true).unwrap();

    let registry = EntityRegistry::load(
        dir.path(),
        &mut HistogramFaceEncoder::new(),
        &store,
        Box::new(InMemoryReferences::new()),
    )
    .unwrap();
    assert_eq!(registry.persons()[0].id, Some(id));
    assert_eq!(registry.persons()[0].role.as_deref(), Some("Supervisor"));
}

#[test]
fn reference_photo_is_verified_end_to_end() {
    let dir = tempdir().unwrap();
    write_photo(dir.path(), "alice.png", [240, 0, 0]);
    write_photo(dir.path(), "bob.png", [0, 0, 240]);

    let registry = EntityRegistry::load(
        dir.path(),
        &mut HistogramFaceEncoder::new(),
        &users(),
        Box::new(InMemoryReferences::new()),
    )
    .unwrap();

    let red = RgbImage::from_pixel(64, 48, Rgb([240, 0, 0]));
    let green = RgbImage::from_pixel(64, 48, Rgb([0, 240, 0]));
    let mut source = MemorySource::from_frames(
        "gate",
        vec![
            Frame::from_rgb_image(0, 1_000, red),
            Frame::from_rgb_image(1, 2_000, green),
        ],
    );
    let mut stages = Stages::from_backends(InferenceBackends::stub(), "gunny bag", "plate");
    let mut sink = InMemoryEventStore::new();
    Orchestrator::new(
        &registry,
        MatchingPolicy::new(0.6).unwrap(),
        EventBuilder::new("CAM-1", "AutoZone", 50.0).unwrap(),
    )
    .run(&mut source, &mut stages, &mut sink)
    .unwrap();

    let statuses: Vec<_> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            gate_sentinel::Event::FaceLog(f) => Some((f.status, f.person_id)),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![(FaceStatus::Verified, Some(1)), (FaceStatus::Intrusion, None)]
    );
}
