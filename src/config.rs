//! Process configuration
//!
//! `AppConfig` holds collaborator endpoints and credentials; `PipelineConfig`
//! holds the tunable constants of the correlation pipeline. Both are read from
//! the environment with fallbacks.

use std::str::FromStr;
use std::time::Duration;

/// Collaborator endpoints and credentials
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Organization slug used in backend URLs
    pub organization_slug: String,
    /// Backend (directory service) base URL
    pub backend_api_url: String,
    /// Backend API key (sent as `api-key` header when set)
    pub backend_api_key: Option<String>,
    /// Shinobi NVR base URL
    pub shinobi_url: String,
    /// Shinobi API key
    pub shinobi_api_key: String,
    /// Shinobi group key
    pub shinobi_group_key: String,
    /// Bucket URL where cropped face images are written
    pub faces_bucket_url: String,
    /// Inference server URL (weapon + face models)
    pub detector_url: String,
    /// Snapshot polling interval per monitor
    pub snapshot_interval: Duration,
    /// Pipeline tunables
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            organization_slug: std::env::var("ORGANIZATION_SLUG")
                .unwrap_or_else(|_| "default".to_string()),
            backend_api_url: std::env::var("BACKEND_API_URL")
                .unwrap_or_else(|_| "https://api.samscloud.io/api/v2".to_string()),
            backend_api_key: std::env::var("BACKEND_API_KEY").ok(),
            shinobi_url: std::env::var("SHINOBI_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            shinobi_api_key: std::env::var("SHINOBI_API_KEY").unwrap_or_default(),
            shinobi_group_key: std::env::var("SHINOBI_GROUP_KEY").unwrap_or_default(),
            faces_bucket_url: std::env::var("FACES_BUCKET_URL")
                .unwrap_or_else(|_| "https://located-faces.s3.us-west-2.amazonaws.com".to_string()),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            snapshot_interval: Duration::from_millis(env_or("SNAPSHOT_INTERVAL_MS", 200)),
            pipeline: PipelineConfig::from_env(),
        }
    }
}

impl AppConfig {
    /// Fail fast on settings the daemon cannot run without
    pub fn validate(&self) -> crate::Result<()> {
        if self.shinobi_api_key.is_empty() || self.shinobi_group_key.is_empty() {
            return Err(crate::Error::Config(
                "SHINOBI_API_KEY and SHINOBI_GROUP_KEY must be set".to_string(),
            ));
        }
        self.pipeline.validate()
    }
}

/// Tunable pipeline constants
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Consecutive sampled weapon frames required before an incident signal
    pub max_frames_for_trigger: u32,
    /// Silence on the active monitor after which the incident ends
    pub detection_timeout: Duration,
    /// Incident age after which the watchdog may expire it
    pub incident_timeout: Duration,
    /// TTL for standalone (live-tracking) identities
    pub identity_ttl: Duration,
    /// TTL for identities linked to an incident that is no longer active
    pub shooter_ttl: Duration,
    /// Watchdog sweep interval
    pub watchdog_interval: Duration,
    /// Max wait on an empty stage queue before housekeeping
    pub queue_poll_interval: Duration,
    /// Max box-center distance for a face to be a shooter candidate
    pub correlation_threshold: f32,
    /// Face distance at or below which two encodings match
    pub face_match_tolerance: f32,
    /// Run weapon detection on every Nth frame of a monitor
    pub weapon_sample_stride: u64,
    /// Run live face tracking on every Nth frame of a monitor
    pub face_sample_stride: u64,
    /// Frame ingress queue capacity
    pub frame_queue_capacity: usize,
    /// Inter-stage queue capacity
    pub stage_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames_for_trigger: 5,
            detection_timeout: Duration::from_secs(30),
            incident_timeout: Duration::from_secs(5 * 60),
            identity_ttl: Duration::from_secs(5 * 60),
            shooter_ttl: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            queue_poll_interval: Duration::from_secs(1),
            correlation_threshold: 400.0,
            face_match_tolerance: 0.6,
            weapon_sample_stride: 5,
            face_sample_stride: 50,
            frame_queue_capacity: 64,
            stage_queue_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MAX_FRAMES_FOR_TRIGGER`, `DETECTION_TIMEOUT_SEC`, ...
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_frames_for_trigger: env_or("MAX_FRAMES_FOR_TRIGGER", d.max_frames_for_trigger),
            detection_timeout: secs_or("DETECTION_TIMEOUT_SEC", d.detection_timeout),
            incident_timeout: secs_or("INCIDENT_TIMEOUT_SEC", d.incident_timeout),
            identity_ttl: secs_or("IDENTITY_TTL_SEC", d.identity_ttl),
            shooter_ttl: secs_or("SHOOTER_TTL_SEC", d.shooter_ttl),
            watchdog_interval: secs_or("WATCHDOG_INTERVAL_SEC", d.watchdog_interval),
            queue_poll_interval: Duration::from_millis(env_or(
                "QUEUE_POLL_INTERVAL_MS",
                d.queue_poll_interval.as_millis() as u64,
            )),
            correlation_threshold: env_or("CORRELATION_THRESHOLD", d.correlation_threshold),
            face_match_tolerance: env_or("FACE_MATCH_TOLERANCE", d.face_match_tolerance),
            weapon_sample_stride: env_or("WEAPON_SAMPLE_STRIDE", d.weapon_sample_stride),
            face_sample_stride: env_or("FACE_SAMPLE_STRIDE", d.face_sample_stride),
            frame_queue_capacity: env_or("FRAME_QUEUE_CAPACITY", d.frame_queue_capacity),
            stage_queue_capacity: env_or("STAGE_QUEUE_CAPACITY", d.stage_queue_capacity),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_frames_for_trigger == 0 {
            return Err(crate::Error::Config("MAX_FRAMES_FOR_TRIGGER must be >= 1".to_string()));
        }
        if self.weapon_sample_stride == 0 || self.face_sample_stride == 0 {
            return Err(crate::Error::Config("sample strides must be >= 1".to_string()));
        }
        if self.frame_queue_capacity == 0 || self.stage_queue_capacity == 0 {
            return Err(crate::Error::Config("queue capacities must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_frames_for_trigger, 5);
        assert_eq!(config.detection_timeout, Duration::from_secs(30));
        assert_eq!(config.incident_timeout, Duration::from_secs(300));
        assert_eq!(config.shooter_ttl, Duration::from_secs(30));
        assert_eq!(config.correlation_threshold, 400.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_trigger_rejected() {
        let config = PipelineConfig {
            max_frames_for_trigger: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
