//! RecorderClient - Shinobi NVR Adapter
//!
//! ## Responsibilities
//!
//! - Switch a monitor between `record` and `start` (watch-only) modes
//! - Snapshot retrieval for the frame poller

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Recorder control the pipeline depends on
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start_recording(&self, monitor_id: &str) -> Result<()>;
    async fn stop_recording(&self, monitor_id: &str) -> Result<()>;
}

/// Source of still frames for monitors without a stream ingress
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Latest encoded (JPEG) snapshot
    async fn fetch_snapshot(&self, monitor_id: &str) -> Result<Vec<u8>>;
}

/// Shinobi monitor modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Watch only
    Start,
    Record,
}

impl MonitorMode {
    fn as_str(self) -> &'static str {
        match self {
            MonitorMode::Start => "start",
            MonitorMode::Record => "record",
        }
    }
}

/// Shinobi HTTP API client
pub struct ShinobiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    group_key: String,
}

impl ShinobiClient {
    pub fn new(base_url: String, api_key: String, group_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            group_key,
        })
    }

    fn monitor_url(&self, monitor_id: &str, mode: MonitorMode) -> String {
        format!(
            "{}/{}/monitor/{}/{}/{}",
            self.base_url,
            self.api_key,
            self.group_key,
            urlencoding::encode(monitor_id),
            mode.as_str()
        )
    }

    async fn set_mode(&self, monitor_id: &str, mode: MonitorMode) -> Result<()> {
        let resp = self.client.get(self.monitor_url(monitor_id, mode)).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Recorder(format!(
                "monitor {} mode {} failed: {}",
                monitor_id,
                mode.as_str(),
                resp.status()
            )));
        }
        tracing::debug!(monitor_id = %monitor_id, mode = mode.as_str(), "Shinobi monitor mode set");
        Ok(())
    }

    fn snapshot_url(&self, monitor_id: &str) -> String {
        format!(
            "{}/{}/jpeg/{}/{}/s.jpg",
            self.base_url,
            self.api_key,
            self.group_key,
            urlencoding::encode(monitor_id)
        )
    }
}

#[async_trait]
impl SnapshotSource for ShinobiClient {
    async fn fetch_snapshot(&self, monitor_id: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(self.snapshot_url(monitor_id)).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Recorder(format!(
                "snapshot for {} failed: {}",
                monitor_id,
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Recorder for ShinobiClient {
    async fn start_recording(&self, monitor_id: &str) -> Result<()> {
        self.set_mode(monitor_id, MonitorMode::Record).await
    }

    async fn stop_recording(&self, monitor_id: &str) -> Result<()> {
        self.set_mode(monitor_id, MonitorMode::Start).await
    }
}
