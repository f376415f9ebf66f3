use super::*;
use crate::models::{BoundingBox, FaceEncoding, FaceObservation};
use crate::test_support::{test_frame, FakeDetector, FakeDirectory, FakeRecorder, FakeStorage};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

struct Fakes {
    detector: Arc<FakeDetector>,
    directory: Arc<FakeDirectory>,
    recorder: Arc<FakeRecorder>,
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        weapon_sample_stride: 1,
        face_sample_stride: 1000,
        queue_poll_interval: Duration::from_millis(20),
        watchdog_interval: Duration::from_millis(50),
        ..PipelineConfig::default()
    }
}

fn start(config: PipelineConfig) -> (Pipeline, Fakes) {
    let fakes = Fakes {
        detector: Arc::new(FakeDetector::default()),
        directory: Arc::new(FakeDirectory::default()),
        recorder: Arc::new(FakeRecorder::default()),
    };
    let deps = PipelineDeps {
        detector: fakes.detector.clone(),
        directory: fakes.directory.clone(),
        recorder: fakes.recorder.clone(),
        storage: Arc::new(FakeStorage::default()),
    };
    (Pipeline::start(deps, FaceDataset::new(), config), fakes)
}

/// 10x10 box centered on (cx, cy)
fn centered(cx: f32, cy: f32) -> BoundingBox {
    BoundingBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0)
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Next message on the subscription with the given event name
async fn next_event(subscription: &mut Subscription, event: &str) -> Value {
    loop {
        let raw = timeout(Duration::from_secs(2), subscription.receiver.recv())
            .await
            .expect("no notification")
            .expect("subscription closed");
        let value: Value = serde_json::from_str(&raw).unwrap();
        if value["event"] == event {
            return value;
        }
    }
}

#[tokio::test]
async fn test_weapon_with_unknown_face_creates_incident() {
    let (pipeline, fakes) = start(test_config());
    let mut subscription = pipeline.subscribe("m1").await;

    fakes.detector.set_weapons(vec![centered(100.0, 100.0)]);
    fakes.detector.set_faces(vec![FaceObservation {
        location: centered(130.0, 140.0), // 50 from the gun
        encoding: Some(FaceEncoding(vec![0.1, 0.2, 0.3])),
    }]);

    for _ in 0..5 {
        assert!(pipeline.submit_frame("m1", test_frame(320, 240)));
    }

    let detected = next_event(&mut subscription, "OBJECT_DETECTED").await;
    let incident_id = detected["payload"]["incident_id"].as_i64().unwrap();
    assert_eq!(detected["payload"]["camera_id"], "m1");
    assert_eq!(detected["payload"]["object_type"], "gun");

    let linked = pipeline.tracker().linked_to(incident_id).await;
    assert_eq!(linked.len(), 1);
    assert!(!linked[0].is_known);
    assert_eq!(
        detected["payload"]["shooters"],
        serde_json::json!([linked[0].id.clone()])
    );

    assert_eq!(fakes.directory.created_incidents(), 1);
    assert_eq!(fakes.recorder.starts("m1"), 1);
    assert_eq!(
        pipeline.incidents().active_incident_id().await,
        Some(incident_id)
    );

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_four_weapon_frames_do_not_trigger() {
    let (pipeline, fakes) = start(test_config());
    fakes.detector.set_weapons(vec![centered(100.0, 100.0)]);

    for _ in 0..4 {
        pipeline.submit_frame("m1", test_frame(64, 64));
    }
    let detector = fakes.detector.clone();
    wait_until(|| {
        let detector = detector.clone();
        async move { detector.weapon_calls() == 4 }
    })
    .await;
    sleep(Duration::from_millis(50)).await;

    assert!(pipeline.incidents().snapshot().await.is_none());
    assert_eq!(fakes.directory.created_incidents(), 0);
    assert!(fakes.recorder.calls().is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_detection_lost_ends_incident() {
    let config = PipelineConfig {
        detection_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let (pipeline, fakes) = start(config);
    let mut subscription = pipeline.subscribe("m1").await;
    fakes.detector.set_weapons(vec![centered(100.0, 100.0)]);

    for _ in 0..5 {
        pipeline.submit_frame("m1", test_frame(64, 64));
    }
    next_event(&mut subscription, "OBJECT_DETECTED").await;

    let ended = next_event(&mut subscription, "INCIDENT_END").await;
    assert_eq!(ended["payload"]["camera_id"], "m1");
    assert!(pipeline.incidents().snapshot().await.is_none());

    let recorder = fakes.recorder.clone();
    wait_until(|| {
        let recorder = recorder.clone();
        async move { recorder.stops("m1") == 1 }
    })
    .await;
    assert_eq!(fakes.recorder.starts("m1"), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_recording_status_published() {
    let (pipeline, fakes) = start(test_config());
    let mut subscription = pipeline.subscribe("m1").await;
    fakes.detector.set_weapons(vec![centered(100.0, 100.0)]);

    for _ in 0..5 {
        pipeline.submit_frame("m1", test_frame(64, 64));
    }

    let status = next_event(&mut subscription, "CAMERA_STATUS_CHANGED").await;
    assert_eq!(status["payload"]["camera_status"], "record");

    assert!(pipeline.unsubscribe(&subscription).await);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_faceless_frame_expires_stale_identities() {
    let (pipeline, fakes) = start(PipelineConfig {
        face_sample_stride: 1,
        watchdog_interval: Duration::from_secs(3600),
        ..test_config()
    });
    // Let the watchdog run its immediate first sweep
    sleep(Duration::from_millis(50)).await;

    let long_ago = Utc::now() - chrono::Duration::minutes(10);
    let seen = pipeline
        .tracker()
        .observe_faces_at(
            "m1",
            &test_frame(64, 64),
            &[FaceObservation {
                location: centered(20.0, 20.0),
                encoding: Some(FaceEncoding(vec![0.4])),
            }],
            crate::identity_tracker::ObservationContext::default(),
            long_ago,
        )
        .await;
    assert_eq!(seen.findings.len(), 1);

    assert!(pipeline.submit_frame("m1", test_frame(64, 64)));

    let directory = fakes.directory.clone();
    wait_until(|| {
        let directory = directory.clone();
        async move { directory.reported_removed().len() == 1 }
    })
    .await;
    assert!(pipeline.tracker().tracked().await.is_empty());
    assert_eq!(fakes.detector.face_calls(), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_within_poll_interval() {
    let (pipeline, _fakes) = start(PipelineConfig {
        queue_poll_interval: Duration::from_millis(20),
        ..PipelineConfig::default()
    });
    assert!(pipeline.is_running());
    assert!(pipeline.set_tracking_preference("7", true));

    timeout(Duration::from_millis(500), pipeline.shutdown())
        .await
        .expect("shutdown did not complete");
}
