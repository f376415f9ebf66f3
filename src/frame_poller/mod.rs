//! FramePoller - Snapshot Ingress
//!
//! Polls each roster monitor's latest snapshot from the recorder and feeds
//! the decoded frame into the pipeline. Monitors are polled sequentially
//! every interval.

use crate::error::{Error, Result};
use crate::models::Frame;
use crate::pipeline_router::FrameSink;
use crate::recorder_client::SnapshotSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct FramePoller {
    source: Arc<dyn SnapshotSource>,
    sink: FrameSink,
    monitors: Vec<String>,
}

impl FramePoller {
    pub fn new(source: Arc<dyn SnapshotSource>, sink: FrameSink, monitors: Vec<String>) -> Self {
        Self {
            source,
            sink,
            monitors,
        }
    }

    /// Poll every `poll_interval` until `running` clears
    pub fn spawn(self, poll_interval: Duration, running: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(monitors = self.monitors.len(), "Frame poller started");
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                self.poll_once().await;
            }
            tracing::info!("Frame poller stopped");
        })
    }

    /// One pass over all monitors; returns how many frames were queued
    pub async fn poll_once(&self) -> usize {
        let mut queued = 0;
        for monitor_id in &self.monitors {
            match self.fetch_frame(monitor_id).await {
                Ok(frame) => {
                    if self.sink.submit(monitor_id, frame) {
                        queued += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(monitor_id = %monitor_id, error = %e, "Snapshot poll failed");
                }
            }
        }
        queued
    }

    async fn fetch_frame(&self, monitor_id: &str) -> Result<Frame> {
        let bytes = self.source.fetch_snapshot(monitor_id).await?;
        tokio::task::spawn_blocking(move || Frame::decode(&bytes))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }
}
