//! Inter-stage messages

use crate::models::{BoundingBox, Frame, IncidentId, MonitorId};
use chrono::{DateTime, Utc};

/// Frame handed to the detection stage
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    pub monitor_id: MonitorId,
    pub frame: Frame,
    pub received_at: DateTime<Utc>,
}

/// Messages consumed by the incident stage
#[derive(Debug, Clone)]
pub enum IncidentCommand {
    /// Weapon corroborated by the debounce window
    WeaponDetected {
        monitor_id: MonitorId,
        frame: Frame,
        weapon_boxes: Vec<BoundingBox>,
        detected_at: DateTime<Utc>,
    },
    /// No corroborated detection on the monitor for the detection timeout
    DetectionLost {
        monitor_id: MonitorId,
        at: DateTime<Utc>,
    },
}

/// Messages consumed by the face stage
#[derive(Debug, Clone)]
pub enum FaceCommand {
    /// Live tracking sample
    Observe { monitor_id: MonitorId, frame: Frame },
    /// Recognize the faces holding the weapons of an incident frame
    DetectShooters {
        monitor_id: MonitorId,
        frame: Frame,
        weapon_boxes: Vec<BoundingBox>,
        incident_id: IncidentId,
        /// Publish OBJECT_DETECTED once shooters are resolved
        announce: bool,
    },
    /// Tracking preference pushed by the directory service
    SyncTrackingPreference { user_id: String, enabled: bool },
}
