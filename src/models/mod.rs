//! Shared data models
//!
//! Types that flow between pipeline stages: frames, boxes, face encodings.

use crate::error::{Error, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;

/// Monitor (camera) identifier as assigned by the recorder
pub type MonitorId = String;

/// Incident identifier as assigned by the directory service
pub type IncidentId = i64;

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Build from the detector's `x, y, width, height` form
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Euclidean distance between the two box centers
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
    }

    /// Integer crop rectangle `(x, y, w, h)` clamped to a `width x height`
    /// frame; `None` when nothing is left after clamping.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.left.max(0.0).floor() as u32;
        let top = self.top.max(0.0).floor() as u32;
        let right = (self.right.max(0.0).ceil() as u32).min(width);
        let bottom = (self.bottom.max(0.0).ceil() as u32).min(height);
        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// Decoded RGB frame tagged with nothing but its pixels.
///
/// Cloning is cheap: the pixel buffer is shared.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image: Arc::new(image) }
    }

    /// Decode an encoded image (JPEG snapshot, reference photo)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Encode the whole frame as JPEG
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        encode_jpeg(&self.image)
    }

    /// Crop `region` out of the frame and encode it as JPEG
    pub fn crop_jpeg(&self, region: &BoundingBox) -> Result<Vec<u8>> {
        let (x, y, w, h) = region
            .clamp_to(self.width(), self.height())
            .ok_or_else(|| Error::Image(format!("crop {:?} outside frame", region)))?;
        let face = image::imageops::crop_imm(self.image.as_ref(), x, y, w, h).to_image();
        encode_jpeg(&face)
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
    Ok(buf)
}

/// Face embedding produced by the face model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceEncoding(pub Vec<f32>);

impl FaceEncoding {
    /// Euclidean distance between two encodings
    pub fn distance(&self, other: &FaceEncoding) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A face found in a frame.
///
/// `encoding` is `None` when the encoder could not produce an embedding
/// (crop too small, occluded); such faces are dropped by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    pub location: BoundingBox,
    #[serde(default)]
    pub encoding: Option<FaceEncoding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_distance() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(30.0, 40.0, 40.0, 50.0);
        // centers (5,5) and (35,45)
        assert!((a.center_distance(&b) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_clamp_outside_frame() {
        let b = BoundingBox::new(120.0, 10.0, 150.0, 20.0);
        assert!(b.clamp_to(100, 100).is_none());
        let partial = BoundingBox::new(-5.0, -5.0, 20.0, 20.0);
        assert_eq!(partial.clamp_to(100, 100), Some((0, 0, 20, 20)));
    }

    #[test]
    fn test_crop_jpeg_roundtrips_dimensions() {
        let frame = Frame::new(RgbImage::new(64, 48));
        let jpeg = frame.crop_jpeg(&BoundingBox::new(8.0, 8.0, 40.0, 32.0)).unwrap();
        let decoded = Frame::decode(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_face_distance() {
        let a = FaceEncoding(vec![0.0, 0.0, 0.0]);
        let b = FaceEncoding(vec![0.3, 0.4, 0.0]);
        assert!((a.distance(&b) - 0.5).abs() < 1e-6);
    }
}
