//! DetectionAdapter - Weapon / Face Model Boundary
//!
//! ## Responsibilities
//!
//! - `Detector` trait the pipeline calls per frame
//! - `RemoteDetector`: inference server adapter (multipart JPEG upload)
//!
//! The models themselves live outside this crate.

use crate::error::{Error, Result};
use crate::models::{BoundingBox, FaceEncoding, FaceObservation, Frame};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Detection models as seen by the pipeline
#[async_trait]
pub trait Detector: Send + Sync {
    /// Weapon boxes in frame coordinates
    async fn detect_weapons(&self, frame: &Frame) -> Result<Vec<BoundingBox>>;

    /// Faces with their encodings (encoding may be missing per face)
    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceObservation>>;
}

/// Object classes that count as a weapon
const WEAPON_LABELS: [&str; 3] = ["gun", "rifle", "weapon"];

/// Minimum model confidence for a weapon box
const MIN_WEAPON_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Deserialize)]
struct WeaponResponse {
    #[serde(default)]
    boxes: Vec<WeaponBox>,
}

#[derive(Debug, Deserialize)]
struct WeaponBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    label: String,
    conf: f32,
}

#[derive(Debug, Deserialize)]
struct FaceResponse {
    #[serde(default)]
    faces: Vec<FaceBox>,
}

/// Face location in the model's `top, right, bottom, left` order
#[derive(Debug, Deserialize)]
struct FaceBox {
    top: f32,
    right: f32,
    bottom: f32,
    left: f32,
    #[serde(default)]
    encoding: Option<Vec<f32>>,
}

impl From<FaceBox> for FaceObservation {
    fn from(face: FaceBox) -> Self {
        FaceObservation {
            location: BoundingBox::new(face.left, face.top, face.right, face.bottom),
            encoding: face.encoding.filter(|e| !e.is_empty()).map(FaceEncoding),
        }
    }
}

/// Inference server client
pub struct RemoteDetector {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteDetector {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_frame(&self, path: &str, frame: &Frame) -> Result<reqwest::Response> {
        // JPEG encoding is CPU bound
        let owned = frame.clone();
        let jpeg = tokio::task::spawn_blocking(move || owned.to_jpeg())
            .await
            .map_err(|e| Error::Internal(format!("encode task failed: {}", e)))??;

        let form = Form::new().part(
            "image",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Detection(format!(
                "{} failed: {}",
                path,
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    async fn detect_weapons(&self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let resp: WeaponResponse = self.post_frame("/v1/weapons", frame).await?.json().await?;
        Ok(weapon_boxes(resp))
    }

    async fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceObservation>> {
        let resp: FaceResponse = self.post_frame("/v1/faces", frame).await?.json().await?;
        Ok(resp.faces.into_iter().map(FaceObservation::from).collect())
    }
}

fn weapon_boxes(resp: WeaponResponse) -> Vec<BoundingBox> {
    resp.boxes
        .into_iter()
        .filter(|b| b.conf > MIN_WEAPON_CONFIDENCE)
        .filter(|b| WEAPON_LABELS.contains(&b.label.to_lowercase().as_str()))
        .map(|b| BoundingBox::from_xywh(b.x, b.y, b.width, b.height))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_filter_drops_fire_and_low_confidence() {
        let resp: WeaponResponse = serde_json::from_str(
            r#"{"boxes": [
                {"x": 10, "y": 10, "width": 20, "height": 20, "label": "Gun", "conf": 0.9},
                {"x": 0, "y": 0, "width": 5, "height": 5, "label": "Fire", "conf": 0.9},
                {"x": 0, "y": 0, "width": 5, "height": 5, "label": "Rifle", "conf": 0.4}
            ]}"#,
        )
        .unwrap();
        let boxes = weapon_boxes(resp);
        assert_eq!(boxes, vec![BoundingBox::new(10.0, 10.0, 30.0, 30.0)]);
    }

    #[test]
    fn test_face_box_order_and_missing_encoding() {
        let resp: FaceResponse = serde_json::from_str(
            r#"{"faces": [
                {"top": 5, "right": 50, "bottom": 45, "left": 10, "encoding": [0.1, 0.2]},
                {"top": 0, "right": 3, "bottom": 3, "left": 0, "encoding": []}
            ]}"#,
        )
        .unwrap();
        let faces: Vec<FaceObservation> = resp.faces.into_iter().map(Into::into).collect();
        assert_eq!(faces[0].location, BoundingBox::new(10.0, 5.0, 50.0, 45.0));
        assert!(faces[0].encoding.is_some());
        assert!(faces[1].encoding.is_none());
    }
}
