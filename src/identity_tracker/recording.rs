//! Recording demand held by tracked identities

use super::{IdentityTracker, TrackedIdentity};
use crate::recording_refs::RecordingRefs;

impl IdentityTracker {
    /// Move an identity's recording demand to the monitor it is wanted on
    ///
    /// Acquires on the new monitor before releasing the old one. No tracker
    /// lock is held across recorder calls.
    pub async fn sync_recording(&self, recording: &RecordingRefs, identity_id: &str) {
        let Some(identity) = self.get(identity_id).await else {
            return;
        };

        let wanted = identity.wanted_recording().map(str::to_string);
        if wanted == identity.recording_monitor {
            return;
        }

        if let Some(monitor_id) = &wanted {
            recording.acquire(monitor_id).await;
        }
        if let Some(held) = &identity.recording_monitor {
            recording.release(held).await;
        }
        tracing::debug!(
            identity_id = %identity_id,
            from = ?identity.recording_monitor,
            to = ?wanted,
            "Identity recording demand moved"
        );
        self.set_recording_monitor(identity_id, wanted).await;
    }
}

/// Release the demand held by identities that left the cache
pub async fn release_recordings(recording: &RecordingRefs, identities: &[TrackedIdentity]) {
    for identity in identities {
        if let Some(monitor_id) = &identity.recording_monitor {
            recording.release(monitor_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::identity_tracker::{FaceDataset, ObservationContext};
    use crate::models::{BoundingBox, FaceEncoding, FaceObservation};
    use crate::test_support::{test_frame, FakeRecorder, FakeStorage};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_known_user_recording_follows_hand_off() {
        let mut dataset = FaceDataset::new();
        dataset.insert_known("7", true, vec![FaceEncoding(vec![0.5])]);
        let tracker = IdentityTracker::new(dataset, Arc::new(FakeStorage::default()), &PipelineConfig::default());
        let recorder = Arc::new(FakeRecorder::default());
        let recording = RecordingRefs::new(recorder.clone(), None);
        let frame = test_frame(100, 100);
        let face = FaceObservation {
            location: BoundingBox::from_xywh(10.0, 10.0, 20.0, 20.0),
            encoding: Some(FaceEncoding(vec![0.5])),
        };
        let now = Utc::now();

        tracker
            .observe_faces_at("m1", &frame, &[face.clone()], ObservationContext::default(), now)
            .await;
        tracker.sync_recording(&recording, "7").await;
        assert_eq!(recording.count("m1").await, 1);

        tracker
            .observe_faces_at("m2", &frame, &[face], ObservationContext::default(), now)
            .await;
        tracker.sync_recording(&recording, "7").await;
        assert_eq!(recording.count("m1").await, 0);
        assert_eq!(recording.count("m2").await, 1);
        assert_eq!(recorder.stops("m1"), 1);

        // Idempotent when nothing changed
        tracker.sync_recording(&recording, "7").await;
        assert_eq!(recording.count("m2").await, 1);

        let expired = tracker
            .expire_stale_at(None, None, now + ChronoDuration::minutes(6))
            .await;
        release_recordings(&recording, &expired).await;
        assert_eq!(recording.count("m2").await, 0);
    }
}
