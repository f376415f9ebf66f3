//! Bootstrap - Startup Roster Loading
//!
//! Fetches the monitor roster and the known-user roster from the directory
//! service, then builds the FaceDataset from each user's reference photos.
//! A photo that cannot be fetched, decoded or encoded is skipped; a user left
//! without encodings is kept and never matches.

use crate::detection_adapter::Detector;
use crate::directory_client::{Directory, KnownUser};
use crate::error::{Error, Result};
use crate::identity_tracker::FaceDataset;
use crate::models::{FaceEncoding, Frame};
use crate::object_storage::ObjectStorage;
use tracing::{info, warn};

/// Everything the pipeline needs at startup
pub struct Bootstrap {
    pub monitors: Vec<String>,
    pub dataset: FaceDataset,
}

pub async fn load(
    directory: &dyn Directory,
    storage: &dyn ObjectStorage,
    detector: &dyn Detector,
) -> Result<Bootstrap> {
    let monitors: Vec<String> = directory
        .fetch_monitors()
        .await?
        .into_iter()
        .map(|m| m.monitor_id)
        .collect();

    let users = directory.fetch_known_users().await?;
    let mut dataset = FaceDataset::new();
    for user in &users {
        let encodings = reference_encodings(user, storage, detector).await;
        if encodings.is_empty() {
            warn!(user_id = %user.id, "No usable reference photo");
        }
        dataset.insert_known(&user.id, user.tracking_enabled, encodings);
    }

    info!(
        monitors = monitors.len(),
        users = users.len(),
        tracking_enabled = dataset.tracking_enabled_count(),
        "Rosters loaded"
    );
    Ok(Bootstrap { monitors, dataset })
}

/// First face encoding of every reference photo
async fn reference_encodings(
    user: &KnownUser,
    storage: &dyn ObjectStorage,
    detector: &dyn Detector,
) -> Vec<FaceEncoding> {
    let mut encodings = Vec::new();
    for url in &user.face_images {
        match reference_encoding(url, storage, detector).await {
            Ok(Some(encoding)) => encodings.push(encoding),
            Ok(None) => warn!(user_id = %user.id, url = %url, "No face found in reference photo"),
            Err(e) => warn!(user_id = %user.id, url = %url, error = %e, "Reference photo skipped"),
        }
    }
    encodings
}

async fn reference_encoding(
    url: &str,
    storage: &dyn ObjectStorage,
    detector: &dyn Detector,
) -> Result<Option<FaceEncoding>> {
    let bytes = storage.get_object(url).await?;
    let frame = tokio::task::spawn_blocking(move || Frame::decode(&bytes))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
    let faces = detector.detect_faces(&frame).await?;
    Ok(faces.into_iter().find_map(|f| f.encoding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_client::MonitorInfo;
    use crate::models::{BoundingBox, FaceObservation};
    use crate::test_support::{test_frame, FakeDetector, FakeDirectory, FakeStorage};

    fn user(id: &str, tracking: bool, images: &[&str]) -> KnownUser {
        KnownUser {
            id: id.to_string(),
            tracking_enabled: tracking,
            face_images: images.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_load_builds_dataset_from_photos() {
        let directory = FakeDirectory::default();
        *directory.monitors.lock().unwrap() = vec![
            MonitorInfo { monitor_id: "m1".to_string(), name: None },
            MonitorInfo { monitor_id: "m2".to_string(), name: Some("Lobby".to_string()) },
        ];
        *directory.known_users.lock().unwrap() = vec![
            user("7", true, &["mem://ref/7a.jpg", "mem://ref/missing.jpg"]),
            user("9", false, &[]),
        ];

        let storage = FakeStorage::default();
        storage.insert_object("mem://ref/7a.jpg", test_frame(32, 32).to_jpeg().unwrap());

        let detector = FakeDetector::default();
        detector.set_faces(vec![
            FaceObservation {
                location: BoundingBox::from_xywh(0.0, 0.0, 4.0, 4.0),
                encoding: None,
            },
            FaceObservation {
                location: BoundingBox::from_xywh(8.0, 8.0, 16.0, 16.0),
                encoding: Some(FaceEncoding(vec![0.4, 0.4])),
            },
        ]);

        let loaded = load(&directory, &storage, &detector).await.unwrap();
        assert_eq!(loaded.monitors, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(loaded.dataset.ids(), vec!["7".to_string(), "9".to_string()]);
        assert_eq!(loaded.dataset.get("7").unwrap().encodings, vec![FaceEncoding(vec![0.4, 0.4])]);
        assert!(loaded.dataset.get("9").unwrap().encodings.is_empty());
        assert_eq!(loaded.dataset.tracking_enabled_count(), 1);
    }
}
