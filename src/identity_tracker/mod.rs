//! IdentityTracker - Face Deduplication and Live Tracking Cache
//!
//! ## Responsibilities
//!
//! - Match observed face encodings against the FaceDataset (known users and
//!   ephemeral faces seen earlier in the session)
//! - Maintain the tracked-identity cache (register / refresh / hand-off)
//! - TTL eviction of identities that stopped appearing
//! - Per-user tracking preference
//!
//! Dataset and cache share one mutex. Crop encoding and uploads run outside it.

mod dataset;
mod recording;
mod types;

pub use dataset::{DatasetEntry, EntryKind, FaceDataset, FaceMatch};
pub use recording::release_recordings;
pub use types::{Finding, FindingKind, Observation, ObservationContext, TrackedIdentity};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::models::{BoundingBox, FaceObservation, Frame, IncidentId};
use crate::object_storage::ObjectStorage;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct TrackerState {
    dataset: FaceDataset,
    tracked: HashMap<String, TrackedIdentity>,
    /// Ids whose tracking was re-enabled while on camera
    pending_announce: HashSet<String>,
}

/// Face deduplication and tracking cache
pub struct IdentityTracker {
    state: Mutex<TrackerState>,
    storage: Arc<dyn ObjectStorage>,
    match_tolerance: f32,
    identity_ttl: Duration,
    shooter_ttl: Duration,
}

impl IdentityTracker {
    pub fn new(dataset: FaceDataset, storage: Arc<dyn ObjectStorage>, config: &PipelineConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                dataset,
                tracked: HashMap::new(),
                pending_announce: HashSet::new(),
            }),
            storage,
            match_tolerance: config.face_match_tolerance,
            identity_ttl: config.identity_ttl,
            shooter_ttl: config.shooter_ttl,
        }
    }

    /// Resolve a batch of faces seen on `monitor_id`
    pub async fn observe_faces(
        &self,
        monitor_id: &str,
        frame: &Frame,
        faces: &[FaceObservation],
        ctx: ObservationContext,
    ) -> Observation {
        self.observe_faces_at(monitor_id, frame, faces, ctx, Utc::now()).await
    }

    pub async fn observe_faces_at(
        &self,
        monitor_id: &str,
        frame: &Frame,
        faces: &[FaceObservation],
        ctx: ObservationContext,
        now: DateTime<Utc>,
    ) -> Observation {
        let mut findings: Vec<Finding> = Vec::new();
        // (finding index, face box) awaiting a crop upload
        let mut uploads: Vec<(usize, BoundingBox)> = Vec::new();

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let mut resolved: HashSet<String> = HashSet::new();

            for face in faces {
                let Some(encoding) = &face.encoding else {
                    debug!(monitor_id = %monitor_id, "Face without encoding dropped");
                    continue;
                };

                let (id, is_known, score, tracking_enabled) =
                    match state.dataset.best_match(encoding, self.match_tolerance) {
                        Some(m) => {
                            let is_known = m.kind == EntryKind::Known;
                            // Shooters of the live incident stay tracked whatever their preference
                            let live_shooter = ctx.live_incident.is_some()
                                && state
                                    .tracked
                                    .get(&m.id)
                                    .map_or(false, |i| i.incident_id == ctx.live_incident);
                            if is_known && !m.tracking_enabled && !ctx.force_tracking && !live_shooter {
                                debug!(user_id = %m.id, "Tracking disabled, face skipped");
                                continue;
                            }
                            (m.id, is_known, m.distance, m.tracking_enabled)
                        }
                        None => {
                            let id = Uuid::new_v4().to_string();
                            state.dataset.insert_ephemeral(&id, encoding.clone());
                            (id, false, 0.0, true)
                        }
                    };

                // Two faces resolving to one identity in the same frame
                if !resolved.insert(id.clone()) {
                    continue;
                }

                let tracking_enabled = tracking_enabled || ctx.force_tracking;

                match state.tracked.get_mut(&id) {
                    Some(identity) => {
                        identity.last_seen = now;
                        identity.match_score = score;
                        identity.tracking_enabled |= tracking_enabled;

                        let relinked =
                            ctx.incident_id.is_some() && identity.incident_id != ctx.incident_id;
                        if relinked {
                            identity.incident_id = ctx.incident_id;
                        }
                        let announce = state.pending_announce.remove(&id);

                        if identity.monitor_id != monitor_id {
                            let from = std::mem::replace(&mut identity.monitor_id, monitor_id.to_string());
                            identity.face_image_url = None;
                            info!(identity_id = %id, from = %from, to = %monitor_id, "Identity handed off");
                            uploads.push((findings.len(), face.location));
                            findings.push(Finding {
                                kind: FindingKind::HandOff { from },
                                identity: identity.clone(),
                            });
                        } else if relinked {
                            findings.push(Finding {
                                kind: FindingKind::Linked,
                                identity: identity.clone(),
                            });
                        } else if announce {
                            findings.push(Finding {
                                kind: FindingKind::Resumed,
                                identity: identity.clone(),
                            });
                        }
                    }
                    None => {
                        let identity = TrackedIdentity {
                            id: id.clone(),
                            is_known,
                            monitor_id: monitor_id.to_string(),
                            match_score: score,
                            face_image_url: None,
                            first_seen: now,
                            last_seen: now,
                            incident_id: ctx.incident_id,
                            tracking_enabled,
                            recording_monitor: None,
                        };
                        info!(
                            identity_id = %id,
                            monitor_id = %monitor_id,
                            is_known = is_known,
                            incident_id = ?ctx.incident_id,
                            "Identity registered"
                        );
                        state.pending_announce.remove(&id);
                        state.tracked.insert(id, identity.clone());
                        uploads.push((findings.len(), face.location));
                        findings.push(Finding {
                            kind: FindingKind::New,
                            identity,
                        });
                    }
                }
            }
        }

        self.upload_crops(frame, &mut findings, &uploads, now).await;

        let expired = self
            .expire_stale_at(Some(monitor_id), ctx.live_incident, now)
            .await;

        Observation { findings, expired }
    }

    async fn upload_crops(
        &self,
        frame: &Frame,
        findings: &mut [Finding],
        uploads: &[(usize, BoundingBox)],
        now: DateTime<Utc>,
    ) {
        let mut stored: Vec<(usize, String)> = Vec::new();

        for (idx, location) in uploads {
            let id = &findings[*idx].identity.id;
            let bytes = match frame.crop_jpeg(location) {
                Ok(b) => b,
                Err(e) => {
                    warn!(identity_id = %id, error = %e, "Face crop failed");
                    continue;
                }
            };
            match self.storage.put_face_image(bytes, &crop_key(id, now)).await {
                Ok(url) => stored.push((*idx, url)),
                Err(e) => warn!(identity_id = %id, error = %e, "Face image upload failed"),
            }
        }

        if stored.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        for (idx, url) in stored {
            let finding = &mut findings[idx];
            if let Some(identity) = state.tracked.get_mut(&finding.identity.id) {
                // Skip if the identity moved again while uploading
                if identity.monitor_id == finding.identity.monitor_id {
                    identity.face_image_url = Some(url.clone());
                }
            }
            finding.identity.face_image_url = Some(url);
        }
    }

    /// Remove identities whose TTL has elapsed
    ///
    /// Identities linked to `live_incident` are kept while it is active.
    /// Incident-scoped identities use the shooter TTL once their incident is
    /// over; standalone identities use the identity TTL. `monitor_id` limits
    /// the scan to one monitor.
    pub async fn expire_stale_at(
        &self,
        monitor_id: Option<&str>,
        live_incident: Option<IncidentId>,
        now: DateTime<Utc>,
    ) -> Vec<TrackedIdentity> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let stale: Vec<String> = state
            .tracked
            .values()
            .filter(|i| monitor_id.map_or(true, |m| i.monitor_id == m))
            .filter(|i| match i.incident_id {
                Some(incident) if Some(incident) == live_incident => false,
                Some(_) => is_older_than(i.last_seen, now, self.shooter_ttl),
                None => is_older_than(i.last_seen, now, self.identity_ttl),
            })
            .map(|i| i.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(identity) = state.tracked.remove(&id) {
                state.pending_announce.remove(&id);
                if !identity.is_known {
                    state.dataset.forget_ephemeral(&id);
                }
                debug!(identity_id = %id, monitor_id = %identity.monitor_id, "Identity expired");
                expired.push(identity);
            }
        }
        expired
    }

    /// Flip a user's tracking preference
    ///
    /// Returns the tracked identity affected by the change, if the user is
    /// currently on camera. Re-enabling queues a re-announcement for the next
    /// observation.
    pub async fn set_tracking_preference(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> Result<Option<TrackedIdentity>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let previous = state
            .dataset
            .set_tracking(user_id, enabled)
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))?;

        info!(user_id = %user_id, enabled = enabled, previous = previous, "Tracking preference updated");

        let Some(identity) = state.tracked.get_mut(user_id) else {
            return Ok(None);
        };
        identity.tracking_enabled = enabled;
        if enabled && !previous {
            state.pending_announce.insert(user_id.to_string());
        } else if !enabled {
            state.pending_announce.remove(user_id);
        }
        Ok(Some(identity.clone()))
    }

    /// Number of tracked identities requiring or holding recording on
    /// `monitor_id`
    pub async fn recording_demand_for(&self, monitor_id: &str) -> usize {
        let state = self.state.lock().await;
        state
            .tracked
            .values()
            .filter(|i| {
                i.recording_monitor.as_deref() == Some(monitor_id)
                    || i.wanted_recording() == Some(monitor_id)
            })
            .count()
    }

    /// Record which monitor an identity holds a recording demand on
    pub async fn set_recording_monitor(&self, identity_id: &str, monitor_id: Option<String>) {
        let mut state = self.state.lock().await;
        if let Some(identity) = state.tracked.get_mut(identity_id) {
            identity.recording_monitor = monitor_id;
        }
    }

    pub async fn get(&self, identity_id: &str) -> Option<TrackedIdentity> {
        let state = self.state.lock().await;
        state.tracked.get(identity_id).cloned()
    }

    /// Identities linked to an incident
    pub async fn linked_to(&self, incident_id: IncidentId) -> Vec<TrackedIdentity> {
        let state = self.state.lock().await;
        state
            .tracked
            .values()
            .filter(|i| i.incident_id == Some(incident_id))
            .cloned()
            .collect()
    }

    /// Remove every identity linked to an incident
    pub async fn remove_linked(&self, incident_id: IncidentId) -> Vec<TrackedIdentity> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let ids: Vec<String> = state
            .tracked
            .values()
            .filter(|i| i.incident_id == Some(incident_id))
            .map(|i| i.id.clone())
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(identity) = state.tracked.remove(&id) {
                state.pending_announce.remove(&id);
                if !identity.is_known {
                    state.dataset.forget_ephemeral(&id);
                }
                removed.push(identity);
            }
        }
        removed
    }

    /// Snapshot of all tracked identities, sorted by id
    pub async fn tracked(&self) -> Vec<TrackedIdentity> {
        let state = self.state.lock().await;
        let mut all: Vec<TrackedIdentity> = state.tracked.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn dataset_len(&self) -> usize {
        self.state.lock().await.dataset.len()
    }
}

/// Object key for a face crop: `{id}-{YYYYmmdd-HHMMSS}.jpg`
pub fn crop_key(identity_id: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}.jpg", identity_id, at.format("%Y%m%d-%H%M%S"))
}

fn is_older_than(then: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - then).to_std() {
        Ok(age) => age > ttl,
        Err(_) => false,
    }
}
