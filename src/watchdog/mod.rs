//! Watchdog - Periodic Reconciliation
//!
//! ## Passes (in order, every tick)
//!
//! 1. Incident expiry: the incident and every identity linked to it have been
//!    quiet for the incident timeout
//! 2. Stale identity cleanup: TTL eviction, removals reported in one batch
//! 3. Recording reconciliation: monitors with bookkeeping demand but no live
//!    incident/identity demand are force-stopped
//!
//! Each pass is isolated; an error or panic in one is logged and the sweep
//! continues.

use crate::directory_client::{Directory, RemovedRecord};
use crate::error::Result;
use crate::identity_tracker::{release_recordings, IdentityTracker, TrackedIdentity};
use crate::incident_manager::IncidentManager;
use crate::models::IncidentId;
use crate::recording_refs::RecordingRefs;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info};

/// What one sweep changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub ended_incident: Option<IncidentId>,
    pub removed_identities: Vec<String>,
    pub force_stopped: Vec<String>,
}

pub struct Watchdog {
    incidents: Arc<IncidentManager>,
    tracker: Arc<IdentityTracker>,
    recording: Arc<RecordingRefs>,
    directory: Arc<dyn Directory>,
    incident_timeout: Duration,
}

impl Watchdog {
    pub fn new(
        incidents: Arc<IncidentManager>,
        tracker: Arc<IdentityTracker>,
        recording: Arc<RecordingRefs>,
        directory: Arc<dyn Directory>,
        incident_timeout: Duration,
    ) -> Self {
        Self {
            incidents,
            tracker,
            recording,
            directory,
            incident_timeout,
        }
    }

    /// Run sweeps every `sweep_interval` until `running` clears
    pub fn spawn(
        self: Arc<Self>,
        sweep_interval: Duration,
        poll_interval: Duration,
        running: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = sweep_interval.as_millis() as u64, "Watchdog started");
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                if timeout(poll_interval, ticker.tick()).await.is_ok() {
                    self.tick().await;
                }
            }
            info!("Watchdog stopped");
        })
    }

    pub async fn tick(&self) -> SweepReport {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        if let Some(ended) = guarded("incident_expiry", self.expire_incident(now)).await {
            report.ended_incident = ended;
        }
        if let Some(removed) = guarded("identity_cleanup", self.expire_identities(now)).await {
            report.removed_identities = removed;
        }
        if let Some(stopped) = guarded("recording_reconcile", self.reconcile_recording()).await {
            report.force_stopped = stopped;
        }

        if report != SweepReport::default() {
            info!(
                ended_incident = ?report.ended_incident,
                removed = report.removed_identities.len(),
                force_stopped = report.force_stopped.len(),
                "Watchdog sweep applied changes"
            );
        }
        report
    }

    async fn expire_incident(&self, now: DateTime<Utc>) -> Result<Option<IncidentId>> {
        let Some(incident) = self.incidents.snapshot().await else {
            return Ok(None);
        };
        if !older_than(incident.last_update, now, self.incident_timeout) {
            return Ok(None);
        }

        let linked = self.tracker.linked_to(incident.id).await;
        if linked
            .iter()
            .any(|i| !older_than(i.last_seen, now, self.incident_timeout))
        {
            debug!(incident_id = incident.id, "Incident quiet but shooters still seen");
            return Ok(None);
        }

        let Some(ended) = self
            .incidents
            .end_if_unchanged(incident.id, incident.last_update)
            .await
        else {
            return Ok(None);
        };

        let removed = self.tracker.remove_linked(ended.id).await;
        release_recordings(&self.recording, &removed).await;
        if let Err(e) = self.report_removed(&removed).await {
            error!(incident_id = ended.id, error = %e, "Failed to report shooters removed with incident");
        }
        Ok(Some(ended.id))
    }

    async fn expire_identities(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let live = self.incidents.active_incident_id().await;
        let expired = self.tracker.expire_stale_at(None, live, now).await;
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        release_recordings(&self.recording, &expired).await;
        self.report_removed(&expired).await?;
        Ok(expired.into_iter().map(|i| i.id).collect())
    }

    async fn reconcile_recording(&self) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        for (monitor_id, count) in self.recording.monitors_with_demand().await {
            // Incident and identity state is set before their acquire, so
            // demand racing this check changes the count and force_stop_if
            // backs off
            if self.live_demand(&monitor_id).await > 0 {
                continue;
            }
            info!(monitor_id = %monitor_id, count = count, "Recording demand drifted, forcing stop");
            if self.recording.force_stop_if(&monitor_id, count).await > 0 {
                stopped.push(monitor_id);
            }
        }
        Ok(stopped)
    }

    async fn live_demand(&self, monitor_id: &str) -> usize {
        self.incidents.recording_demand_for(monitor_id).await as usize
            + self.tracker.recording_demand_for(monitor_id).await
    }

    async fn report_removed(&self, identities: &[TrackedIdentity]) -> Result<()> {
        if identities.is_empty() {
            return Ok(());
        }
        let removed: Vec<RemovedRecord> = identities.iter().map(RemovedRecord::from).collect();
        self.directory.report_findings(&[], &removed).await
    }
}

/// Run one pass, containing errors and panics
async fn guarded<T, F>(pass: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(pass = pass, error = %e, "Watchdog pass failed");
            None
        }
        Err(_) => {
            error!(pass = pass, "Watchdog pass panicked");
            None
        }
    }
}

fn older_than(then: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    (now - then).to_std().map_or(false, |age| age > limit)
}
