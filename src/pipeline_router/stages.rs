//! Stage workers
//!
//! Each stage owns one queue receiver and runs on its own task. An empty
//! queue wakes the stage every poll interval for housekeeping and to observe
//! the stop flag.

use super::events::{FaceCommand, FrameEnvelope, IncidentCommand};
use crate::config::PipelineConfig;
use crate::correlation_engine::CorrelationEngine;
use crate::detection_adapter::Detector;
use crate::directory_client::{Directory, FindingRecord, RemovedRecord};
use crate::identity_tracker::{release_recordings, IdentityTracker, Observation, ObservationContext};
use crate::incident_manager::{IncidentManager, Transition, WeaponDebouncer};
use crate::models::{BoundingBox, FaceObservation, Frame, IncidentId, MonitorId};
use crate::notification_dispatcher::{NotificationEvent, Notifier};
use crate::recording_refs::RecordingRefs;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Non-blocking hand-off; a full queue drops the message
fn hand_off<T>(tx: &mpsc::Sender<T>, message: T, queue: &'static str) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(queue = queue, "Queue full, message dropped");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(queue = queue, "Queue closed, message dropped");
            false
        }
    }
}

struct MonitorProgress {
    frames: u64,
    debouncer: WeaponDebouncer,
    last_corroborated: Option<DateTime<Utc>>,
}

/// Frame sampling, weapon detection and debounce
pub(crate) struct DetectionStage {
    detector: Arc<dyn Detector>,
    incident_tx: mpsc::Sender<IncidentCommand>,
    face_tx: mpsc::Sender<FaceCommand>,
    config: PipelineConfig,
    monitors: HashMap<MonitorId, MonitorProgress>,
}

impl DetectionStage {
    pub(crate) fn new(
        detector: Arc<dyn Detector>,
        incident_tx: mpsc::Sender<IncidentCommand>,
        face_tx: mpsc::Sender<FaceCommand>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            incident_tx,
            face_tx,
            config,
            monitors: HashMap::new(),
        }
    }

    pub(crate) fn spawn(
        mut self,
        mut rx: mpsc::Receiver<FrameEnvelope>,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Detection stage started");
            let poll = self.config.queue_poll_interval;
            while running.load(Ordering::SeqCst) {
                match timeout(poll, rx.recv()).await {
                    Ok(Some(envelope)) => self.handle_frame(envelope).await,
                    Ok(None) => break,
                    Err(_) => {}
                }
                self.check_lost(Utc::now());
            }
            info!("Detection stage stopped");
        })
    }

    async fn handle_frame(&mut self, envelope: FrameEnvelope) {
        let FrameEnvelope {
            monitor_id,
            frame,
            received_at,
        } = envelope;

        let required = self.config.max_frames_for_trigger;
        let progress = self
            .monitors
            .entry(monitor_id.clone())
            .or_insert_with(|| MonitorProgress {
                frames: 0,
                debouncer: WeaponDebouncer::new(required),
                last_corroborated: None,
            });
        let index = progress.frames;
        progress.frames += 1;

        if index % self.config.weapon_sample_stride == 0 {
            match self.detector.detect_weapons(&frame).await {
                Ok(weapon_boxes) => {
                    if progress.debouncer.observe(!weapon_boxes.is_empty()) {
                        debug!(
                            monitor_id = %monitor_id,
                            weapons = weapon_boxes.len(),
                            "Weapon corroborated"
                        );
                        progress.last_corroborated = Some(received_at);
                        hand_off(
                            &self.incident_tx,
                            IncidentCommand::WeaponDetected {
                                monitor_id: monitor_id.clone(),
                                frame: frame.clone(),
                                weapon_boxes,
                                detected_at: received_at,
                            },
                            "incident",
                        );
                    }
                }
                Err(e) => warn!(monitor_id = %monitor_id, error = %e, "Weapon detection failed"),
            }
        }

        if index % self.config.face_sample_stride == 0 {
            hand_off(&self.face_tx, FaceCommand::Observe { monitor_id, frame }, "face");
        }
    }

    /// Signal monitors whose last corroborated detection is older than the
    /// detection timeout
    fn check_lost(&mut self, now: DateTime<Utc>) {
        let detection_timeout = self.config.detection_timeout;
        for (monitor_id, progress) in self.monitors.iter_mut() {
            let Some(last) = progress.last_corroborated else {
                continue;
            };
            let quiet = (now - last)
                .to_std()
                .map_or(false, |age| age >= detection_timeout);
            if !quiet {
                continue;
            }
            progress.last_corroborated = None;
            debug!(monitor_id = %monitor_id, "Weapon no longer seen");
            hand_off(
                &self.incident_tx,
                IncidentCommand::DetectionLost {
                    monitor_id: monitor_id.clone(),
                    at: now,
                },
                "incident",
            );
        }
    }
}

/// Single writer of incident state
pub(crate) struct IncidentStage {
    incidents: Arc<IncidentManager>,
    face_tx: mpsc::Sender<FaceCommand>,
    notifier: Notifier,
    poll_interval: Duration,
}

impl IncidentStage {
    pub(crate) fn new(
        incidents: Arc<IncidentManager>,
        face_tx: mpsc::Sender<FaceCommand>,
        notifier: Notifier,
        poll_interval: Duration,
    ) -> Self {
        Self {
            incidents,
            face_tx,
            notifier,
            poll_interval,
        }
    }

    pub(crate) fn spawn(
        self,
        mut rx: mpsc::Receiver<IncidentCommand>,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Incident stage started");
            while running.load(Ordering::SeqCst) {
                match timeout(self.poll_interval, rx.recv()).await {
                    Ok(Some(command)) => self.handle(command).await,
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
            info!("Incident stage stopped");
        })
    }

    async fn handle(&self, command: IncidentCommand) {
        match command {
            IncidentCommand::WeaponDetected {
                monitor_id,
                frame,
                weapon_boxes,
                detected_at,
            } => {
                let Some(transition) = self.incidents.track_at(&monitor_id, detected_at).await else {
                    return;
                };
                let incident_id = transition.incident_id();
                let announce = matches!(transition, Transition::Created { .. });

                let queued = hand_off(
                    &self.face_tx,
                    FaceCommand::DetectShooters {
                        monitor_id: monitor_id.clone(),
                        frame,
                        weapon_boxes,
                        incident_id,
                        announce,
                    },
                    "face",
                );
                if !queued && announce {
                    self.notifier.publish(
                        &monitor_id,
                        NotificationEvent::gun_detected(&monitor_id, incident_id, Vec::new()),
                    );
                }
            }
            IncidentCommand::DetectionLost { monitor_id, at } => {
                self.incidents.end_if_quiet_at(&monitor_id, at).await;
            }
        }
    }
}

/// Face detection, shooter correlation and identity tracking
pub(crate) struct FaceStage {
    detector: Arc<dyn Detector>,
    tracker: Arc<IdentityTracker>,
    incidents: Arc<IncidentManager>,
    recording: Arc<RecordingRefs>,
    directory: Arc<dyn Directory>,
    correlation: CorrelationEngine,
    notifier: Notifier,
    poll_interval: Duration,
}

impl FaceStage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        detector: Arc<dyn Detector>,
        tracker: Arc<IdentityTracker>,
        incidents: Arc<IncidentManager>,
        recording: Arc<RecordingRefs>,
        directory: Arc<dyn Directory>,
        correlation: CorrelationEngine,
        notifier: Notifier,
        poll_interval: Duration,
    ) -> Self {
        Self {
            detector,
            tracker,
            incidents,
            recording,
            directory,
            correlation,
            notifier,
            poll_interval,
        }
    }

    pub(crate) fn spawn(
        self,
        mut rx: mpsc::Receiver<FaceCommand>,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Face stage started");
            while running.load(Ordering::SeqCst) {
                match timeout(self.poll_interval, rx.recv()).await {
                    Ok(Some(command)) => self.handle(command).await,
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
            info!("Face stage stopped");
        })
    }

    async fn handle(&self, command: FaceCommand) {
        match command {
            FaceCommand::Observe { monitor_id, frame } => {
                let faces = match self.detector.detect_faces(&frame).await {
                    Ok(faces) => faces,
                    Err(e) => {
                        warn!(monitor_id = %monitor_id, error = %e, "Face detection failed");
                        Vec::new()
                    }
                };
                // An empty batch still expires stale identities on this monitor
                let live = self.incidents.active_incident_id().await;
                let observation = self
                    .tracker
                    .observe_faces(&monitor_id, &frame, &faces, ObservationContext::live(live))
                    .await;
                self.apply(observation).await;
            }
            FaceCommand::DetectShooters {
                monitor_id,
                frame,
                weapon_boxes,
                incident_id,
                announce,
            } => {
                self.detect_shooters(&monitor_id, &frame, &weapon_boxes, incident_id, announce)
                    .await;
            }
            FaceCommand::SyncTrackingPreference { user_id, enabled } => {
                match self.tracker.set_tracking_preference(&user_id, enabled).await {
                    Ok(Some(identity)) => {
                        self.tracker.sync_recording(&self.recording, &identity.id).await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(user_id = %user_id, error = %e, "Tracking preference not applied"),
                }
            }
        }
    }

    async fn detect_shooters(
        &self,
        monitor_id: &str,
        frame: &Frame,
        weapon_boxes: &[BoundingBox],
        incident_id: IncidentId,
        announce: bool,
    ) {
        let faces = match self.detector.detect_faces(frame).await {
            Ok(faces) => faces,
            Err(e) => {
                warn!(monitor_id = %monitor_id, incident_id = incident_id, error = %e, "Shooter face detection failed");
                Vec::new()
            }
        };

        let face_boxes: Vec<BoundingBox> = faces.iter().map(|f| f.location).collect();
        let shooter_boxes = self.correlation.correlate(weapon_boxes, &face_boxes);
        let shooter_faces: Vec<FaceObservation> = faces
            .into_iter()
            .filter(|f| shooter_boxes.contains(&f.location))
            .collect();

        if !shooter_faces.is_empty() {
            let observation = self
                .tracker
                .observe_faces(
                    monitor_id,
                    frame,
                    &shooter_faces,
                    ObservationContext::shooters(incident_id),
                )
                .await;

            let new_shooters: Vec<String> = observation
                .findings
                .iter()
                .map(|f| f.identity.id.clone())
                .collect();
            if !new_shooters.is_empty() {
                info!(incident_id = incident_id, shooters = ?new_shooters, "Shooters recognized");
                self.incidents.add_shooters(incident_id, &new_shooters).await;
                if let Err(e) = self
                    .directory
                    .report_shooters(incident_id, monitor_id, &new_shooters)
                    .await
                {
                    error!(incident_id = incident_id, error = %e, "Failed to report shooters");
                }
            }
            self.apply(observation).await;
        }

        if announce {
            let mut shooters: Vec<String> = self
                .tracker
                .linked_to(incident_id)
                .await
                .into_iter()
                .map(|i| i.id)
                .collect();
            shooters.sort();
            self.notifier.publish(
                monitor_id,
                NotificationEvent::gun_detected(monitor_id, incident_id, shooters),
            );
        }
    }

    /// Move recording demand and report the batch to the directory
    async fn apply(&self, observation: Observation) {
        if observation.is_empty() {
            return;
        }

        for finding in &observation.findings {
            self.tracker
                .sync_recording(&self.recording, &finding.identity.id)
                .await;
        }
        release_recordings(&self.recording, &observation.expired).await;

        let new: Vec<FindingRecord> = observation
            .findings
            .iter()
            .map(|f| FindingRecord::from(&f.identity))
            .collect();
        let removed: Vec<RemovedRecord> = observation
            .expired
            .iter()
            .map(RemovedRecord::from)
            .collect();

        if let Err(e) = self.directory.report_findings(&new, &removed).await {
            error!(
                new = new.len(),
                removed = removed.len(),
                error = %e,
                "Failed to report findings"
            );
        }
    }
}
