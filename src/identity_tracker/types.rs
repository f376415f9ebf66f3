//! Identity tracker types

use crate::models::{IncidentId, MonitorId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A face-based identity currently considered present on a monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedIdentity {
    /// Known user id, or a generated ephemeral id
    pub id: String,
    pub is_known: bool,
    pub monitor_id: MonitorId,
    /// Face distance of the match (0 for ephemeral identities)
    pub match_score: f32,
    pub face_image_url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub incident_id: Option<IncidentId>,
    pub tracking_enabled: bool,
    /// Monitor this identity currently holds a recording demand on
    #[serde(skip)]
    pub recording_monitor: Option<MonitorId>,
}

impl TrackedIdentity {
    /// Shooters always record; otherwise only known users who opted in
    pub fn requires_recording(&self) -> bool {
        self.incident_id.is_some() || (self.is_known && self.tracking_enabled)
    }

    /// Monitor this identity should hold a recording demand on
    pub fn wanted_recording(&self) -> Option<&str> {
        self.requires_recording().then_some(self.monitor_id.as_str())
    }
}

/// Why an identity is being reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingKind {
    /// First observation
    New,
    /// Re-observed on a different monitor
    HandOff { from: MonitorId },
    /// Already tracked, now tied to an incident
    Linked,
    /// Tracking was re-enabled while the identity was on camera
    Resumed,
}

/// Identity change produced by an observation batch
#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: FindingKind,
    pub identity: TrackedIdentity,
}

/// How a batch of faces should be treated
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservationContext {
    /// Link every resolved identity to this incident (shooter batches)
    pub incident_id: Option<IncidentId>,
    /// Track regardless of the user's preference
    pub force_tracking: bool,
    /// Incident currently active process-wide, for expiry decisions
    pub live_incident: Option<IncidentId>,
}

impl ObservationContext {
    /// Plain live-tracking batch
    pub fn live(live_incident: Option<IncidentId>) -> Self {
        Self {
            incident_id: None,
            force_tracking: false,
            live_incident,
        }
    }

    /// Shooter batch for `incident_id`
    pub fn shooters(incident_id: IncidentId) -> Self {
        Self {
            incident_id: Some(incident_id),
            force_tracking: true,
            live_incident: Some(incident_id),
        }
    }
}

/// Result of `IdentityTracker::observe_faces`
#[derive(Debug, Default)]
pub struct Observation {
    pub findings: Vec<Finding>,
    pub expired: Vec<TrackedIdentity>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.expired.is_empty()
    }
}
