//! Error taxonomy for the sentinel pipeline.
//!
//! Only [`InferenceError`] is recovered inside the frame loop. Everything else
//! surfaces to the operator through [`SentinelError`] or, for a mid-stream decode
//! failure, through the run summary's termination reason.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::StageKind;

/// Fatal errors reported to the caller of the pipeline.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("video file not found: {}", .0.display())]
    VideoNotFound(PathBuf),

    #[error("failed to open video source {path}: {message}")]
    SourceOpen { path: String, message: String },

    #[error("reference data unavailable: {0}")]
    Registry(#[from] RegistryLoadError),

    #[error("vehicle lookup failed at frame {frame_index}: {message}")]
    RegistryLookup { frame_index: u64, message: String },

    #[error("commit failed at frame {frame_index}: {source}")]
    Persistence {
        frame_index: u64,
        #[source]
        source: PersistenceError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SentinelError {
    /// True for failures raised before the first frame is read.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            SentinelError::VideoNotFound(_)
                | SentinelError::SourceOpen { .. }
                | SentinelError::Registry(_)
                | SentinelError::Config(_)
        )
    }
}

/// Reference data could not be loaded at startup.
#[derive(Debug, Error)]
pub enum RegistryLoadError {
    #[error("known-persons directory {} is missing", .0.display())]
    MissingDirectory(PathBuf),

    #[error("known-persons directory {} contains no image files", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("known-persons directory {} produced no usable identities", .0.display())]
    NoUsableEntries(PathBuf),

    #[error("failed to read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("reference store unreachable: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for RegistryLoadError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryLoadError::Store(err.to_string())
    }
}

/// One detector failed on one frame.
#[derive(Debug, Clone, Error)]
#[error("{stage} stage inference failed: {message}")]
pub struct InferenceError {
    pub stage: StageKind,
    pub message: String,
}

impl InferenceError {
    pub fn new(stage: StageKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Wrap a provider error, keeping its context chain in the message.
    pub fn from_provider(stage: StageKind, err: anyhow::Error) -> Self {
        Self::new(stage, format!("{:#}", err))
    }
}

/// The event store rejected a frame's commit.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store rejected write: {0}")]
    Rejected(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// The frame source failed partway through the stream.
#[derive(Debug, Clone, Error)]
#[error("decode failed at frame {frame_index}: {message}")]
pub struct SourceReadError {
    pub frame_index: u64,
    pub message: String,
}

impl SourceReadError {
    pub fn new(frame_index: u64, message: impl Into<String>) -> Self {
        Self {
            frame_index,
            message: message.into(),
        }
    }
}
