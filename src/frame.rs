//! Decoded frames.
//!
//! - `Frame`: one RGB24 image plus its position in the stream and capture time.
//! - `FrameCrop`: owned sub-image handed to OCR and embedding providers.
//! - `BoundingBox`: pixel-space region reported by detectors.
//!
//! Frames are ephemeral. They live for one orchestrator iteration and are never
//! persisted; pixel data is zeroized on drop.

use anyhow::{anyhow, Result};
use zeroize::Zeroize;

/// Axis-aligned box in pixel coordinates (`x1,y1` inclusive, `x2,y2` exclusive).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Integer pixel rectangle clamped to a `width` x `height` image.
    /// Returns `None` when nothing of the box lies inside the image.
    fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !(self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite())
        {
            return None;
        }
        let x1 = self.x1.floor().clamp(0.0, width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, height as f32) as u32;
        let x2 = self.x2.ceil().clamp(0.0, width as f32) as u32;
        let y2 = self.y2.ceil().clamp(0.0, height as f32) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Position and capture time of a frame; shared by every event the frame yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStamp {
    pub index: u64,
    pub timestamp_ms: i64,
}

/// One decoded RGB24 frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Zero-based position in the source stream.
    pub index: u64,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(index: u64, timestamp_ms: i64, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
            timestamp_ms,
        })
    }

    /// Wrap a decoded still image (used for known-person reference photos).
    pub fn from_rgb_image(index: u64, timestamp_ms: i64, image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            index,
            timestamp_ms,
        }
    }

    pub fn stamp(&self) -> FrameStamp {
        FrameStamp {
            index: self.index,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Read-only RGB24 pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy the frame into an `image` buffer for resizing and model preprocessing.
    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Crop to a detector box, clamped to the frame.
    pub fn crop(&self, bbox: &BoundingBox) -> Result<FrameCrop> {
        let (x, y, w, h) = bbox
            .clamp_to(self.width, self.height)
            .ok_or_else(|| anyhow!("bounding box {:?} lies outside the frame", bbox))?;
        let row_bytes = self.width as usize * 3;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);
        for row in y..y + h {
            let start = row as usize * row_bytes + x as usize * 3;
            let end = start + w as usize * 3;
            data.extend_from_slice(
                self.data
                    .get(start..end)
                    .ok_or_else(|| anyhow!("crop row {} is out of bounds", row))?,
            );
        }
        Ok(FrameCrop {
            data,
            width: w,
            height: h,
        })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Owned RGB24 sub-image of a frame.
pub struct FrameCrop {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl FrameCrop {
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("crop buffer does not match {}x{}", self.width, self.height))
    }
}

impl Drop for FrameCrop {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0]);
            }
        }
        Frame::new(0, 0, width, height, data).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(0, 0, 4, 4, vec![0u8; 10]).is_err());
    }

    #[test]
    fn crop_copies_the_requested_region() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(&BoundingBox::new(2.0, 1.0, 5.0, 3.0)).unwrap();
        assert_eq!((crop.width, crop.height), (3, 2));
        assert_eq!(&crop.pixels()[..3], &[2, 1, 0]);
        assert_eq!(&crop.pixels()[crop.pixels().len() - 3..], &[4, 2, 0]);
    }

    #[test]
    fn crop_clamps_to_frame_bounds() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(&BoundingBox::new(-4.0, 4.0, 20.0, 20.0)).unwrap();
        assert_eq!((crop.width, crop.height), (8, 2));
    }

    #[test]
    fn crop_outside_frame_is_an_error() {
        let frame = gradient_frame(8, 6);
        assert!(frame.crop(&BoundingBox::new(10.0, 10.0, 12.0, 12.0)).is_err());
        assert!(frame.crop(&BoundingBox::new(3.0, 3.0, 3.0, 5.0)).is_err());
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }
}
