//! IncidentManager - Global Incident State Machine
//!
//! ## Transitions
//!
//! - Idle → Active: corroborated weapon detection; incident created in the
//!   directory, recording demand acquired on the monitor
//! - Active → Active (hand-off): detection on another monitor; camera appended
//!   to the incident history, demand moved to the new monitor
//! - Active → Active (refresh): detection on the active monitor
//! - Active → Idle: detection timeout on the active monitor, or watchdog
//!   expiry; directory notified, demand released, INCIDENT_END published
//!
//! The state mutex is held for the whole transition, so at most one incident
//! is ever active and concurrent triggers degrade to hand-off/refresh.

mod debounce;

pub use debounce::WeaponDebouncer;

use crate::directory_client::Directory;
use crate::models::{IncidentId, MonitorId};
use crate::notification_dispatcher::{NotificationEvent, Notifier};
use crate::recording_refs::RecordingRefs;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The active incident
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: IncidentId,
    pub active_monitor_id: MonitorId,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Every monitor the incident has been seen on, in order
    pub monitor_history: Vec<MonitorId>,
    pub shooter_ids: BTreeSet<String>,
}

/// Outcome of a corroborated detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Created { incident_id: IncidentId },
    HandOff { incident_id: IncidentId, from: MonitorId },
    Refreshed { incident_id: IncidentId },
}

impl Transition {
    pub fn incident_id(&self) -> IncidentId {
        match self {
            Transition::Created { incident_id }
            | Transition::HandOff { incident_id, .. }
            | Transition::Refreshed { incident_id } => *incident_id,
        }
    }
}

/// Single global incident owner
pub struct IncidentManager {
    state: Mutex<Option<Incident>>,
    directory: Arc<dyn Directory>,
    recording: Arc<RecordingRefs>,
    notifier: Notifier,
    detection_timeout: Duration,
}

impl IncidentManager {
    pub fn new(
        directory: Arc<dyn Directory>,
        recording: Arc<RecordingRefs>,
        notifier: Notifier,
        detection_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(None),
            directory,
            recording,
            notifier,
            detection_timeout,
        }
    }

    /// Apply a corroborated weapon detection on `monitor_id`
    ///
    /// Returns `None` when no incident could be created; the next corroborated
    /// detection retries.
    pub async fn track(&self, monitor_id: &str) -> Option<Transition> {
        self.track_at(monitor_id, Utc::now()).await
    }

    pub async fn track_at(&self, monitor_id: &str, now: DateTime<Utc>) -> Option<Transition> {
        let mut state = self.state.lock().await;

        if state.is_none() {
            let incident_id = match self.directory.create_incident(monitor_id).await {
                Ok(id) => id,
                Err(e) => {
                    error!(monitor_id = %monitor_id, error = %e, "Failed to create incident");
                    return None;
                }
            };

            info!(incident_id = incident_id, monitor_id = %monitor_id, "Incident created");
            *state = Some(Incident {
                id: incident_id,
                active_monitor_id: monitor_id.to_string(),
                is_active: true,
                started_at: now,
                last_update: now,
                monitor_history: vec![monitor_id.to_string()],
                shooter_ids: BTreeSet::new(),
            });
            self.recording.acquire(monitor_id).await;
            return Some(Transition::Created { incident_id });
        }

        let incident = state.as_mut()?;

        if incident.active_monitor_id == monitor_id {
            incident.last_update = now;
            return Some(Transition::Refreshed {
                incident_id: incident.id,
            });
        }

        let from = incident.active_monitor_id.clone();
        info!(
            incident_id = incident.id,
            from = %from,
            to = %monitor_id,
            "Incident handed off"
        );

        if let Err(e) = self
            .directory
            .append_incident_camera(incident.id, monitor_id)
            .await
        {
            warn!(incident_id = incident.id, monitor_id = %monitor_id, error = %e, "Failed to report incident camera");
        }

        self.recording.acquire(monitor_id).await;
        self.recording.release(&from).await;

        incident.active_monitor_id = monitor_id.to_string();
        incident.last_update = now;
        if !incident.monitor_history.iter().any(|m| m == monitor_id) {
            incident.monitor_history.push(monitor_id.to_string());
        }

        Some(Transition::HandOff {
            incident_id: incident.id,
            from,
        })
    }

    /// End the incident if `monitor_id` is its active monitor and no
    /// corroborated detection arrived for the detection timeout
    pub async fn end_if_quiet_at(&self, monitor_id: &str, now: DateTime<Utc>) -> Option<Incident> {
        let mut state = self.state.lock().await;
        let quiet = match state.as_ref() {
            Some(incident) => {
                incident.active_monitor_id == monitor_id
                    && (now - incident.last_update)
                        .to_std()
                        .map_or(false, |age| age >= self.detection_timeout)
            }
            None => false,
        };
        if !quiet {
            return None;
        }
        self.end_locked(&mut state, "detection timeout").await
    }

    /// End incident `incident_id` only if it has not been updated since
    /// `last_update` was read
    pub async fn end_if_unchanged(
        &self,
        incident_id: IncidentId,
        last_update: DateTime<Utc>,
    ) -> Option<Incident> {
        let mut state = self.state.lock().await;
        match state.as_ref() {
            Some(incident) if incident.id == incident_id && incident.last_update == last_update => {}
            _ => {
                debug!(incident_id = incident_id, "Incident changed before expiry, kept");
                return None;
            }
        }
        self.end_locked(&mut state, "watchdog expiry").await
    }

    /// End whatever incident is active
    pub async fn end(&self) -> Option<Incident> {
        let mut state = self.state.lock().await;
        self.end_locked(&mut state, "explicit end").await
    }

    async fn end_locked(&self, state: &mut Option<Incident>, reason: &str) -> Option<Incident> {
        let mut incident = state.take()?;
        incident.is_active = false;

        if let Err(e) = self.directory.end_incident(incident.id).await {
            warn!(incident_id = incident.id, error = %e, "Failed to report incident end");
        }
        self.recording.release(&incident.active_monitor_id).await;
        self.notifier.publish(
            &incident.active_monitor_id,
            NotificationEvent::IncidentEnd {
                camera_id: incident.active_monitor_id.clone(),
            },
        );

        info!(
            incident_id = incident.id,
            monitor_id = %incident.active_monitor_id,
            reason = reason,
            "Incident ended"
        );
        Some(incident)
    }

    /// Record recognized shooters on the incident
    pub async fn add_shooters(&self, incident_id: IncidentId, shooter_ids: &[String]) {
        let mut state = self.state.lock().await;
        if let Some(incident) = state.as_mut().filter(|i| i.id == incident_id) {
            incident.shooter_ids.extend(shooter_ids.iter().cloned());
        }
    }

    pub async fn active_incident_id(&self) -> Option<IncidentId> {
        self.state.lock().await.as_ref().map(|i| i.id)
    }

    pub async fn snapshot(&self) -> Option<Incident> {
        self.state.lock().await.clone()
    }

    /// Recording demand the incident holds on `monitor_id` (0 or 1)
    pub async fn recording_demand_for(&self, monitor_id: &str) -> u32 {
        let state = self.state.lock().await;
        match state.as_ref() {
            Some(incident) if incident.active_monitor_id == monitor_id => 1,
            _ => 0,
        }
    }

    /// Overwrite `last_update` (tests simulate elapsed time with it)
    #[cfg(test)]
    pub(crate) async fn set_last_update(&self, last_update: DateTime<Utc>) {
        if let Some(incident) = self.state.lock().await.as_mut() {
            incident.last_update = last_update;
        }
    }
}
