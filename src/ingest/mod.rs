//! Frame ingestion sources.
//!
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` streams (always available, for demos and tests)
//! - In-memory scripted sources (tests and embedders)
//!
//! Sources yield frames strictly in stream order. `Ok(None)` means the source is
//! drained; an `Err` means decoding failed partway and no further frames follow.
//! Dropping a source releases its decoder and file handle.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod memory;

pub use file::{FileConfig, FileSource, FileStats};
pub use memory::MemorySource;

use crate::error::SourceReadError;
use crate::frame::Frame;

/// A sequence of decoded frames.
pub trait FrameSource {
    /// Next frame in stream order, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceReadError>;

    /// Human-readable origin (path or URI) for diagnostics.
    fn describe(&self) -> String;
}
