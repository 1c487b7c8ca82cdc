//! Local file frame source.
//!
//! `FileSource` decodes a recorded video from local storage:
//! - Paths must be local (no URL schemes other than `stub://`)
//! - A missing file is a startup error, reported before any decoder is created
//! - Decoder failures at open time are reported as source-open errors
//! - Each frame is stamped with its stream index and capture wall-clock time
//!
//! `stub://<name>[?frames=N]` produces N synthetic 640x480 frames (default 100) and
//! needs no decoder.

use std::path::Path;

use anyhow::Result;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;
use crate::error::{SentinelError, SourceReadError};
use crate::frame::Frame;

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 100;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/var/lib/sentinel/gate.mp4") or `stub://` URI.
    pub path: String,
    /// Target frame rate. The decoder keeps every frame when this is at or above
    /// the native rate.
    pub target_fps: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self, SentinelError> {
        if !is_local_file_path(&config.path) {
            return Err(SentinelError::SourceOpen {
                path: config.path,
                message: "file ingestion only supports local paths (no URL schemes)".to_string(),
            });
        }
        if config.path.starts_with("stub://") {
            let source = SyntheticFileSource::new(config);
            log::info!(
                "FileSource: opened {} (synthetic, {} frames)",
                source.config.path,
                source.total_frames
            );
            return Ok(Self {
                backend: FileBackend::Synthetic(source),
            });
        }

        let path = Path::new(&config.path);
        if !path.is_file() {
            return Err(SentinelError::VideoNotFound(path.to_path_buf()));
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            let source = FfmpegFileSource::new(config.clone()).map_err(|e| {
                SentinelError::SourceOpen {
                    path: config.path.clone(),
                    message: format!("{:#}", e),
                }
            })?;
            log::info!("FileSource: opened {} (ffmpeg)", config.path);
            Ok(Self {
                backend: FileBackend::Ffmpeg(source),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(SentinelError::SourceOpen {
                path: config.path,
                message: "decoding video files requires the ingest-file-ffmpeg feature"
                    .to_string(),
            })
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceReadError> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        self.stats().path
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    total_frames: u64,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        let total_frames = parse_frame_count(&config.path).unwrap_or(DEFAULT_SYNTHETIC_FRAMES);
        Self {
            config,
            total_frames,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceReadError> {
        if self.frame_count >= self.total_frames {
            return Ok(None);
        }
        let index = self.frame_count;
        let pixels = self.generate_synthetic_pixels();
        let timestamp_ms =
            crate::now_ms().map_err(|e| SourceReadError::new(index, e.to_string()))?;
        let frame = Frame::new(index, timestamp_ms, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, pixels)
            .map_err(|e| SourceReadError::new(index, e.to_string()))?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn parse_frame_count(uri: &str) -> Option<u64> {
    let (_, query) = uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "frames")
        .and_then(|(_, value)| value.parse().ok())
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(path: &str) -> Result<FileSource, SentinelError> {
        FileSource::open(FileConfig {
            path: path.to_string(),
            ..FileConfig::default()
        })
    }

    #[test]
    fn synthetic_source_drains_after_requested_frames() {
        let mut source = open("stub://gate?frames=3").unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (640, 480));
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_decoded, 3);
    }

    #[test]
    fn missing_file_is_a_startup_error() {
        let err = open("/definitely/not/here.mp4").err().unwrap();
        assert!(matches!(err, SentinelError::VideoNotFound(_)));
        assert!(err.is_startup());
    }

    #[test]
    fn remote_urls_are_rejected() {
        let err = open("rtsp://camera/stream").err().unwrap();
        assert!(matches!(err, SentinelError::SourceOpen { .. }));
    }

    #[test]
    fn frame_count_parses_from_query() {
        assert_eq!(parse_frame_count("stub://a?frames=7"), Some(7));
        assert_eq!(parse_frame_count("stub://a?x=1&frames=2"), Some(2));
        assert_eq!(parse_frame_count("stub://a"), None);
    }
}
