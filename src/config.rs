use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DEFAULT_DB_PATH: &str = "database.db";
const DEFAULT_CAMERA_ID: &str = "CAM-1";
const DEFAULT_ZONE: &str = "AutoZone";
const DEFAULT_KNOWN_FACES_DIR: &str = "known_faces";
const DEFAULT_FACE_THRESHOLD: f32 = 0.6;
const DEFAULT_VOLUME_PER_BAG: f64 = 50.0;
const DEFAULT_BAG_LABEL: &str = "gunny bag";
const DEFAULT_PLATE_LABEL: &str = "plate";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_OCR_HEIGHT: u32 = 48;
const DEFAULT_OCR_WIDTH: u32 = 320;
const DEFAULT_FACE_EMBED_SIZE: u32 = 112;
const DEFAULT_OCR_CHARSET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    db_path: Option<String>,
    camera_id: Option<String>,
    zone: Option<String>,
    known_faces_dir: Option<PathBuf>,
    target_fps: Option<u32>,
    parallel_stages: Option<bool>,
    matching: Option<MatchingConfigFile>,
    bags: Option<BagConfigFile>,
    plates: Option<PlateConfigFile>,
    backend: Option<String>,
    models: Option<ModelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchingConfigFile {
    face_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct BagConfigFile {
    label: Option<String>,
    volume_per_bag: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PlateConfigFile {
    label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    bag: Option<PathBuf>,
    bag_labels: Option<Vec<String>>,
    plate: Option<PathBuf>,
    plate_labels: Option<Vec<String>>,
    ocr: Option<PathBuf>,
    ocr_charset: Option<String>,
    face_detector: Option<PathBuf>,
    face_embedder: Option<PathBuf>,
    detector_input_size: Option<u32>,
}

/// Runtime configuration for a sentinel run.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub db_path: String,
    pub camera_id: String,
    pub zone: String,
    pub known_faces_dir: PathBuf,
    pub target_fps: u32,
    pub parallel_stages: bool,
    pub face_threshold: f32,
    pub bag_label: String,
    pub volume_per_bag: f64,
    pub plate_label: String,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown backend '{}' (expected stub|tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub bag_model: Option<PathBuf>,
    pub bag_labels: Vec<String>,
    pub plate_model: Option<PathBuf>,
    pub plate_labels: Vec<String>,
    pub ocr_model: Option<PathBuf>,
    pub ocr_charset: String,
    pub ocr_input_height: u32,
    pub ocr_input_width: u32,
    pub face_detector_model: Option<PathBuf>,
    pub face_embedder_model: Option<PathBuf>,
    pub face_embed_size: u32,
    pub detector_input_size: u32,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self::build(SentinelConfigFile::default(), BackendKind::Stub)
    }
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (JSON, or TOML when the extension is `.toml`),
    /// falling back to `SENTINEL_CONFIG`, then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        let file_cfg = match path.or(env_path.as_deref()) {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let kind = match file.backend.as_deref() {
            Some(kind) => BackendKind::parse(kind)?,
            None => BackendKind::Stub,
        };
        Ok(Self::build(file, kind))
    }

    fn build(file: SentinelConfigFile, kind: BackendKind) -> Self {
        let models = file.models.unwrap_or_default();
        let backend = BackendSettings {
            kind,
            bag_model: models.bag,
            bag_labels: models
                .bag_labels
                .unwrap_or_else(|| vec![DEFAULT_BAG_LABEL.to_string()]),
            plate_model: models.plate,
            plate_labels: models
                .plate_labels
                .unwrap_or_else(|| vec!["number_plate".to_string()]),
            ocr_model: models.ocr,
            ocr_charset: models
                .ocr_charset
                .unwrap_or_else(|| DEFAULT_OCR_CHARSET.to_string()),
            ocr_input_height: DEFAULT_OCR_HEIGHT,
            ocr_input_width: DEFAULT_OCR_WIDTH,
            face_detector_model: models.face_detector,
            face_embedder_model: models.face_embedder,
            face_embed_size: DEFAULT_FACE_EMBED_SIZE,
            detector_input_size: models
                .detector_input_size
                .unwrap_or(DEFAULT_DETECTOR_INPUT),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera_id: file
                .camera_id
                .unwrap_or_else(|| DEFAULT_CAMERA_ID.to_string()),
            zone: file.zone.unwrap_or_else(|| DEFAULT_ZONE.to_string()),
            known_faces_dir: file
                .known_faces_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWN_FACES_DIR)),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            parallel_stages: file.parallel_stages.unwrap_or(false),
            face_threshold: file
                .matching
                .and_then(|m| m.face_threshold)
                .unwrap_or(DEFAULT_FACE_THRESHOLD),
            bag_label: file
                .bags
                .as_ref()
                .and_then(|bags| bags.label.clone())
                .unwrap_or_else(|| DEFAULT_BAG_LABEL.to_string()),
            volume_per_bag: file
                .bags
                .and_then(|bags| bags.volume_per_bag)
                .unwrap_or(DEFAULT_VOLUME_PER_BAG),
            plate_label: file
                .plates
                .and_then(|plates| plates.label)
                .unwrap_or_else(|| DEFAULT_PLATE_LABEL.to_string()),
            backend,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SENTINEL_DB_PATH") {
            self.db_path = path;
        }
        if let Some(camera_id) = non_empty_env("SENTINEL_CAMERA_ID") {
            self.camera_id = camera_id;
        }
        if let Some(zone) = non_empty_env("SENTINEL_ZONE") {
            self.zone = zone;
        }
        if let Some(dir) = non_empty_env("SENTINEL_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = non_empty_env("SENTINEL_FACE_THRESHOLD") {
            self.face_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("SENTINEL_FACE_THRESHOLD must be a number"))?;
        }
        if let Some(volume) = non_empty_env("SENTINEL_VOLUME_PER_BAG") {
            self.volume_per_bag = volume
                .parse()
                .map_err(|_| anyhow!("SENTINEL_VOLUME_PER_BAG must be a number"))?;
        }
        if let Some(parallel) = non_empty_env("SENTINEL_PARALLEL_STAGES") {
            self.parallel_stages = parse_bool(&parallel)
                .ok_or_else(|| anyhow!("SENTINEL_PARALLEL_STAGES must be true or false"))?;
        }
        if let Some(kind) = non_empty_env("SENTINEL_BACKEND") {
            self.backend.kind = BackendKind::parse(&kind)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        validate_identifier("camera_id", &self.camera_id)?;
        validate_identifier("zone", &self.zone)?;
        if !(self.face_threshold.is_finite() && self.face_threshold > 0.0) {
            return Err(anyhow!("face_threshold must be a finite number greater than zero"));
        }
        if !(self.volume_per_bag.is_finite() && self.volume_per_bag >= 0.0) {
            return Err(anyhow!("volume_per_bag must be a finite, non-negative number"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.bag_label.trim().is_empty() || self.plate_label.trim().is_empty() {
            return Err(anyhow!("bag and plate labels must not be empty"));
        }
        self.bag_label = self.bag_label.trim().to_lowercase();
        self.plate_label = self.plate_label.trim().to_lowercase();
        Ok(())
    }
}

/// Camera ids and zones are short local identifiers: `[A-Za-z0-9:_-]{1,64}`.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    static IDENT_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = IDENT_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9:_-]{1,64}$").unwrap());
    if !re.is_match(value) {
        return Err(anyhow!(
            "{} must match ^[A-Za-z0-9:_-]{{1,64}}$ (got {:?})",
            field,
            value
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
