//! Reference data consulted while matching: known persons and vehicles.
//!
//! Persons are embedded once at startup from a directory of photos. Vehicles stay
//! behind a [`VehicleRegistry`] so the SQLite table can be queried at match time.
//! Nothing here is mutated once a run starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::detect::{Embedding, FaceEncoder};
use crate::error::RegistryLoadError;
use crate::frame::Frame;

const KNOWN_FACE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Canonical plate form: every whitespace character removed, then uppercased.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VehicleType {
    Truck,
    Van,
    Bike,
    Other(String),
}

impl VehicleType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "truck" => VehicleType::Truck,
            "van" => VehicleType::Van,
            "bike" => VehicleType::Bike,
            _ => VehicleType::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            VehicleType::Truck => "Truck",
            VehicleType::Van => "Van",
            VehicleType::Bike => "Bike",
            VehicleType::Other(name) => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Vehicle {
    /// Normalized plate.
    pub plate: String,
    pub vehicle_type: VehicleType,
    pub authorized: bool,
}

/// A row of the `users` table.
#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub authorized: bool,
}

/// A known face. Photos without a `users` row still take part in nearest-person
/// search, so a look-alike is never credited to someone else; they carry no id.
#[derive(Clone, Debug, PartialEq)]
pub struct Person {
    /// `users.id` the photo resolved to, if any.
    pub id: Option<i64>,
    pub name: String,
    pub role: Option<String>,
    pub authorized: bool,
    pub embedding: Embedding,
}

/// Vehicle lookup by normalized plate.
pub trait VehicleRegistry: Send + Sync {
    fn lookup_vehicle(&self, plate: &str) -> Result<Option<Vehicle>>;
}

impl<T: VehicleRegistry + ?Sized> VehicleRegistry for Arc<T> {
    fn lookup_vehicle(&self, plate: &str) -> Result<Option<Vehicle>> {
        (**self).lookup_vehicle(plate)
    }
}

/// User lookup by exact name, used to resolve known-person photos.
pub trait UserDirectory {
    fn find_user(&self, name: &str) -> Result<Option<UserRecord>>;
}

/// Map-backed reference data for tests and embedders.
#[derive(Default)]
pub struct InMemoryReferences {
    vehicles: HashMap<String, Vehicle>,
    users: Vec<UserRecord>,
}

impl InMemoryReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicle(mut self, plate: &str, vehicle_type: VehicleType, authorized: bool) -> Self {
        let plate = normalize_plate(plate);
        self.vehicles.insert(
            plate.clone(),
            Vehicle {
                plate,
                vehicle_type,
                authorized,
            },
        );
        self
    }

    /// Add a user; ids are assigned from 1 in insertion order.
    pub fn with_user(mut self, name: &str, role: &str, authorized: bool) -> Self {
        let id = self.users.len() as i64 + 1;
        self.users.push(UserRecord {
            id,
            name: name.to_string(),
            role: role.to_string(),
            authorized,
        });
        self
    }
}

impl VehicleRegistry for InMemoryReferences {
    fn lookup_vehicle(&self, plate: &str) -> Result<Option<Vehicle>> {
        Ok(self.vehicles.get(&normalize_plate(plate)).cloned())
    }
}

impl UserDirectory for InMemoryReferences {
    fn find_user(&self, name: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.iter().find(|u| u.name == name).cloned())
    }
}

/// Read-only reference state for one run.
pub struct EntityRegistry {
    persons: Vec<Person>,
    vehicles: Box<dyn VehicleRegistry>,
}

impl EntityRegistry {
    /// Build from already-embedded persons, in registration order.
    pub fn new(persons: Vec<Person>, vehicles: Box<dyn VehicleRegistry>) -> Self {
        Self { persons, vehicles }
    }

    /// Embed every photo in `dir` and resolve it against `users`.
    ///
    /// Files are registered in lexicographic name order. Photos with no detectable
    /// face are skipped quietly. Photos whose base name has no user row are kept
    /// without an id, with a warning. Fails when the directory is missing, holds no
    /// images, or yields no face at all.
    pub fn load(
        dir: &Path,
        encoder: &mut dyn FaceEncoder,
        users: &dyn UserDirectory,
        vehicles: Box<dyn VehicleRegistry>,
    ) -> Result<Self, RegistryLoadError> {
        let files = known_face_files(dir)?;
        if files.is_empty() {
            return Err(RegistryLoadError::EmptyDirectory(dir.to_path_buf()));
        }

        let mut persons = Vec::new();
        for path in files {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                log::warn!("skipping {}: file name is not valid UTF-8", path.display());
                continue;
            };
            let image = match image::open(&path) {
                Ok(image) => image.to_rgb8(),
                Err(e) => {
                    log::warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let faces = match encoder.encode_faces(&Frame::from_rgb_image(0, 0, image)) {
                Ok(faces) => faces,
                Err(e) => {
                    log::warn!("skipping {}: face encoding failed: {:#}", path.display(), e);
                    continue;
                }
            };
            let Some(face) = faces.into_iter().next() else {
                log::debug!("no face found in {}", path.display());
                continue;
            };
            let user = users
                .find_user(name)
                .map_err(|e| RegistryLoadError::Store(format!("{:#}", e)))?;
            let person = match user {
                Some(user) => Person {
                    id: Some(user.id),
                    name: user.name,
                    role: Some(user.role),
                    authorized: user.authorized,
                    embedding: face.embedding,
                },
                None => {
                    log::warn!(
                        "{}: no user named {:?} in the users table; matches will be logged as intrusions",
                        path.display(),
                        name
                    );
                    Person {
                        id: None,
                        name: name.to_string(),
                        role: None,
                        authorized: false,
                        embedding: face.embedding,
                    }
                }
            };
            persons.push(person);
        }

        if persons.is_empty() {
            return Err(RegistryLoadError::NoUsableEntries(dir.to_path_buf()));
        }
        log::info!("loaded {} known person(s) from {}", persons.len(), dir.display());
        Ok(Self::new(persons, vehicles))
    }

    pub fn persons(&self) -> &[Person] {
        &self.persons
    }

    /// Exact match on the normalized plate.
    pub fn lookup_vehicle(&self, plate: &str) -> Result<Option<Vehicle>> {
        self.vehicles.lookup_vehicle(&normalize_plate(plate))
    }

    /// Closest person by Euclidean distance. Ties keep the earlier registration;
    /// references of a different length are ignored.
    pub fn nearest_person(&self, embedding: &Embedding) -> Option<(&Person, f32)> {
        let mut best: Option<(&Person, f32)> = None;
        for person in &self.persons {
            let Some(distance) = person.embedding.distance(embedding) else {
                continue;
            };
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((person, distance));
            }
        }
        best
    }
}

fn known_face_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryLoadError> {
    if !dir.is_dir() {
        return Err(RegistryLoadError::MissingDirectory(dir.to_path_buf()));
    }
    let io_err = |e: std::io::Error| RegistryLoadError::Io {
        path: dir.to_path_buf(),
        message: e.to_string(),
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                KNOWN_FACE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
