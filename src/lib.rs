//! guardcam - CCTV Incident & Identity Correlation
//!
//! Turns per-frame weapon and face detections into incident lifecycle
//! transitions, deduplicated tracked identities, recorder start/stop calls and
//! live notifications.
//!
//! ## Architecture (leaves first)
//!
//! 1. DetectionAdapter - weapon/face models behind the `Detector` trait
//! 2. CorrelationEngine - weapon box to shooter face association
//! 3. IdentityTracker - FaceDataset matching, tracking cache, TTL eviction
//! 4. IncidentManager - single global incident state machine
//! 5. RecordingRefs - per-monitor recording demand reference counts
//! 6. NotificationDispatcher - per-monitor subscriber fan-out
//! 7. Watchdog - periodic reconciliation
//! 8. PipelineRouter - stage workers and bounded queues
//!
//! Collaborators: DirectoryClient (backend), RecorderClient (Shinobi NVR),
//! ObjectStorage (face crops). Bootstrap and FramePoller feed the pipeline
//! when run as a daemon.

pub mod bootstrap;
pub mod config;
pub mod correlation_engine;
pub mod detection_adapter;
pub mod directory_client;
pub mod error;
pub mod frame_poller;
pub mod identity_tracker;
pub mod incident_manager;
pub mod models;
pub mod notification_dispatcher;
pub mod object_storage;
pub mod pipeline_router;
pub mod recorder_client;
pub mod recording_refs;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use pipeline_router::{Pipeline, PipelineDeps};
