//! PipelineRouter - Stage Wiring
//!
//! ```text
//! submit_frame ─▶ [frames] ─▶ DetectionStage ─▶ [incident] ─▶ IncidentStage
//!                                  │                              │
//!                                  └──────────▶ [face] ◀──────────┘
//!                                                 │
//!                                             FaceStage
//!
//! producers ─▶ Notifier ─▶ [notifications] ─▶ NotificationDispatcher
//! Watchdog (interval)
//! ```
//!
//! Bounded queues everywhere except notifications. A full queue drops the
//! message. Shutdown clears a shared flag every worker polls.

mod events;
mod stages;

#[cfg(test)]
mod tests;

pub use events::{FaceCommand, FrameEnvelope, IncidentCommand};

use crate::config::PipelineConfig;
use crate::correlation_engine::CorrelationEngine;
use crate::detection_adapter::Detector;
use crate::directory_client::Directory;
use crate::identity_tracker::{FaceDataset, IdentityTracker};
use crate::incident_manager::IncidentManager;
use crate::models::{Frame, MonitorId};
use crate::notification_dispatcher::{self, NotificationDispatcher, SubscriberId};
use crate::object_storage::ObjectStorage;
use crate::recorder_client::Recorder;
use crate::recording_refs::RecordingRefs;
use crate::watchdog::Watchdog;
use chrono::Utc;
use stages::{DetectionStage, FaceStage, IncidentStage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// External collaborators
#[derive(Clone)]
pub struct PipelineDeps {
    pub detector: Arc<dyn Detector>,
    pub directory: Arc<dyn Directory>,
    pub recorder: Arc<dyn Recorder>,
    pub storage: Arc<dyn ObjectStorage>,
}

/// Cloneable frame ingress handle
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<FrameEnvelope>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<FrameEnvelope>) -> Self {
        Self { tx }
    }

    /// Queue a decoded frame. Returns false if the frame was dropped.
    pub fn submit(&self, monitor_id: &str, frame: Frame) -> bool {
        let envelope = FrameEnvelope {
            monitor_id: monitor_id.to_string(),
            frame,
            received_at: Utc::now(),
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(monitor_id = %monitor_id, "Frame queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Live notification stream for one monitor
pub struct Subscription {
    pub id: SubscriberId,
    pub monitor_id: MonitorId,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Running pipeline
pub struct Pipeline {
    frames: FrameSink,
    face_tx: mpsc::Sender<FaceCommand>,
    dispatcher: Arc<NotificationDispatcher>,
    incidents: Arc<IncidentManager>,
    tracker: Arc<IdentityTracker>,
    recording: Arc<RecordingRefs>,
    watchdog: Arc<Watchdog>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build every component and spawn the stage workers
    pub fn start(deps: PipelineDeps, dataset: FaceDataset, config: PipelineConfig) -> Self {
        tracing::info!(
            dataset_entries = dataset.len(),
            tracking_enabled = dataset.tracking_enabled_count(),
            "Starting pipeline"
        );

        let running = Arc::new(AtomicBool::new(true));
        let poll = config.queue_poll_interval;

        let (notifier, notification_rx) = notification_dispatcher::channel();
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let recording = Arc::new(RecordingRefs::new(deps.recorder.clone(), Some(notifier.clone())));
        let incidents = Arc::new(IncidentManager::new(
            deps.directory.clone(),
            recording.clone(),
            notifier.clone(),
            config.detection_timeout,
        ));
        let tracker = Arc::new(IdentityTracker::new(dataset, deps.storage.clone(), &config));
        let watchdog = Arc::new(Watchdog::new(
            incidents.clone(),
            tracker.clone(),
            recording.clone(),
            deps.directory.clone(),
            config.incident_timeout,
        ));

        let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_capacity);
        let (incident_tx, incident_rx) = mpsc::channel(config.stage_queue_capacity);
        let (face_tx, face_rx) = mpsc::channel(config.stage_queue_capacity);

        let detection = DetectionStage::new(
            deps.detector.clone(),
            incident_tx,
            face_tx.clone(),
            config.clone(),
        );
        let incident = IncidentStage::new(incidents.clone(), face_tx.clone(), notifier.clone(), poll);
        let face = FaceStage::new(
            deps.detector.clone(),
            tracker.clone(),
            incidents.clone(),
            recording.clone(),
            deps.directory.clone(),
            CorrelationEngine::new(config.correlation_threshold),
            notifier,
            poll,
        );

        let handles = vec![
            dispatcher.clone().spawn(notification_rx, running.clone(), poll),
            detection.spawn(frame_rx, running.clone()),
            incident.spawn(incident_rx, running.clone()),
            face.spawn(face_rx, running.clone()),
            watchdog
                .clone()
                .spawn(config.watchdog_interval, poll, running.clone()),
        ];

        Self {
            frames: FrameSink::new(frame_tx),
            face_tx,
            dispatcher,
            incidents,
            tracker,
            recording,
            watchdog,
            running,
            handles,
        }
    }

    /// Register roster monitors with the recording bookkeeping
    pub async fn register_monitors(&self, monitor_ids: &[String]) {
        self.recording.register_monitors(monitor_ids).await;
    }

    /// Queue a decoded frame. Returns false if the frame was dropped.
    pub fn submit_frame(&self, monitor_id: &str, frame: Frame) -> bool {
        self.frames.submit(monitor_id, frame)
    }

    pub fn frame_sink(&self) -> FrameSink {
        self.frames.clone()
    }

    /// Apply a tracking preference pushed by the directory service
    pub fn set_tracking_preference(&self, user_id: &str, enabled: bool) -> bool {
        self.face_tx
            .try_send(FaceCommand::SyncTrackingPreference {
                user_id: user_id.to_string(),
                enabled,
            })
            .is_ok()
    }

    pub async fn subscribe(&self, monitor_id: &str) -> Subscription {
        let (id, receiver) = self.dispatcher.register(monitor_id).await;
        Subscription {
            id,
            monitor_id: monitor_id.to_string(),
            receiver,
        }
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.dispatcher
            .unregister(&subscription.monitor_id, &subscription.id)
            .await
    }

    pub fn incidents(&self) -> &Arc<IncidentManager> {
        &self.incidents
    }

    pub fn tracker(&self) -> &Arc<IdentityTracker> {
        &self.tracker
    }

    pub fn recording(&self) -> &Arc<RecordingRefs> {
        &self.recording
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop every worker and wait for them to exit
    pub async fn shutdown(self) {
        tracing::info!("Stopping pipeline");
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Pipeline worker panicked");
            }
        }
        tracing::info!("Pipeline stopped");
    }
}
