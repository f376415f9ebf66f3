//! RecordingRefs - Per-Monitor Recording Demand Counting
//!
//! Overlapping "record monitor X" demands from the incident manager and the
//! identity tracker are folded into a reference count. The recorder is only
//! called on the 0→1 (start) and 1→0 (stop) edges.
//!
//! Recorder failures are logged and never roll the count back; the watchdog
//! force-stops monitors whose count drifted from real demand.

use crate::notification_dispatcher::{CameraStatus, NotificationEvent, Notifier};
use crate::recorder_client::Recorder;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Recording demand reference counter
pub struct RecordingRefs {
    recorder: Arc<dyn Recorder>,
    counts: RwLock<HashMap<String, u32>>,
    /// Serializes count edges and recorder calls per monitor
    edges: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    notifier: Option<Notifier>,
}

impl RecordingRefs {
    pub fn new(recorder: Arc<dyn Recorder>, notifier: Option<Notifier>) -> Self {
        Self {
            recorder,
            counts: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    /// Register roster monitors at count 0
    pub async fn register_monitors(&self, monitor_ids: &[String]) {
        let mut counts = self.counts.write().await;
        for id in monitor_ids {
            counts.entry(id.clone()).or_insert(0);
        }
        tracing::info!(monitor_count = counts.len(), "Monitors registered for recording");
    }

    /// Add one recording demand; starts the recorder on 0→1
    pub async fn acquire(&self, monitor_id: &str) -> u32 {
        let edge = self.edge_lock(monitor_id).await;
        let _guard = edge.lock().await;

        let count = {
            let mut counts = self.counts.write().await;
            let count = counts.entry(monitor_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        tracing::debug!(monitor_id = %monitor_id, count = count, "Recording demand acquired");

        if count == 1 {
            self.start(monitor_id).await;
        }
        count
    }

    /// Drop one recording demand; stops the recorder on 1→0.
    /// Releasing at zero is a no-op.
    pub async fn release(&self, monitor_id: &str) -> u32 {
        let edge = self.edge_lock(monitor_id).await;
        let _guard = edge.lock().await;

        let count = {
            let mut counts = self.counts.write().await;
            match counts.get_mut(monitor_id) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    *count
                }
                _ => {
                    tracing::debug!(monitor_id = %monitor_id, "Release with no demand ignored");
                    return 0;
                }
            }
        };

        tracing::debug!(monitor_id = %monitor_id, count = count, "Recording demand released");

        if count == 0 {
            self.stop(monitor_id).await;
        }
        count
    }

    /// Zero the count and stop the recorder. Returns the count that was
    /// dropped; a monitor already at zero is left alone.
    pub async fn force_stop(&self, monitor_id: &str) -> u32 {
        self.force_stop_matching(monitor_id, None).await
    }

    /// Force stop only if the count still equals `expected`. Any acquire or
    /// release since the caller read the count leaves the monitor alone.
    pub async fn force_stop_if(&self, monitor_id: &str, expected: u32) -> u32 {
        self.force_stop_matching(monitor_id, Some(expected)).await
    }

    async fn force_stop_matching(&self, monitor_id: &str, expected: Option<u32>) -> u32 {
        let edge = self.edge_lock(monitor_id).await;
        let _guard = edge.lock().await;

        let previous = {
            let mut counts = self.counts.write().await;
            match counts.get_mut(monitor_id) {
                Some(count) if *count > 0 && expected.map_or(true, |e| e == *count) => {
                    std::mem::replace(count, 0)
                }
                Some(count) if *count > 0 => {
                    tracing::debug!(monitor_id = %monitor_id, count = *count, "Demand changed, force stop skipped");
                    return 0;
                }
                _ => return 0,
            }
        };

        tracing::warn!(monitor_id = %monitor_id, dropped = previous, "Recording force-stopped");
        self.stop(monitor_id).await;
        previous
    }

    pub async fn count(&self, monitor_id: &str) -> u32 {
        self.counts
            .read()
            .await
            .get(monitor_id)
            .copied()
            .unwrap_or(0)
    }

    /// Monitors with a non-zero count
    pub async fn monitors_with_demand(&self) -> Vec<(String, u32)> {
        let counts = self.counts.read().await;
        let mut out: Vec<(String, u32)> = counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(m, c)| (m.clone(), *c))
            .collect();
        out.sort();
        out
    }

    async fn start(&self, monitor_id: &str) {
        match self.recorder.start_recording(monitor_id).await {
            Ok(()) => tracing::info!(monitor_id = %monitor_id, "Recording started"),
            Err(e) => tracing::error!(monitor_id = %monitor_id, error = %e, "Failed to start recording"),
        }
        self.notify(monitor_id, CameraStatus::Record);
    }

    async fn stop(&self, monitor_id: &str) {
        match self.recorder.stop_recording(monitor_id).await {
            Ok(()) => tracing::info!(monitor_id = %monitor_id, "Recording stopped"),
            Err(e) => tracing::error!(monitor_id = %monitor_id, error = %e, "Failed to stop recording"),
        }
        self.notify(monitor_id, CameraStatus::Watching);
    }

    fn notify(&self, monitor_id: &str, camera_status: CameraStatus) {
        if let Some(notifier) = &self.notifier {
            notifier.publish(
                monitor_id,
                NotificationEvent::CameraStatusChanged {
                    camera_id: monitor_id.to_string(),
                    camera_status,
                },
            );
        }
    }

    async fn edge_lock(&self, monitor_id: &str) -> Arc<Mutex<()>> {
        {
            let edges = self.edges.read().await;
            if let Some(lock) = edges.get(monitor_id) {
                return lock.clone();
            }
        }

        let mut edges = self.edges.write().await;
        edges
            .entry(monitor_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification_dispatcher;
    use crate::test_support::{FakeRecorder, RecorderCall};

    fn refs() -> (RecordingRefs, Arc<FakeRecorder>) {
        let recorder = Arc::new(FakeRecorder::default());
        (RecordingRefs::new(recorder.clone(), None), recorder)
    }

    #[tokio::test]
    async fn test_start_and_stop_only_on_edges() {
        let (refs, recorder) = refs();

        refs.acquire("m").await;
        refs.acquire("m").await;
        refs.release("m").await;
        assert_eq!(recorder.calls(), vec![RecorderCall::Start("m".to_string())]);

        refs.release("m").await;
        assert_eq!(
            recorder.calls(),
            vec![RecorderCall::Start("m".to_string()), RecorderCall::Stop("m".to_string())]
        );
    }

    #[tokio::test]
    async fn test_release_past_zero_is_noop() {
        let (refs, recorder) = refs();
        refs.register_monitors(&["m".to_string()]).await;

        assert_eq!(refs.release("m").await, 0);
        assert_eq!(refs.release("unknown").await, 0);
        assert!(recorder.calls().is_empty());
        assert_eq!(refs.count("m").await, 0);
    }

    #[tokio::test]
    async fn test_recorder_failure_keeps_count() {
        let (refs, recorder) = refs();
        recorder.fail(true);

        assert_eq!(refs.acquire("m").await, 1);
        assert_eq!(refs.count("m").await, 1);
        assert_eq!(refs.monitors_with_demand().await, vec![("m".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_force_stop_zeroes_count() {
        let (refs, recorder) = refs();
        refs.acquire("m").await;
        refs.acquire("m").await;

        assert_eq!(refs.force_stop("m").await, 2);
        assert_eq!(refs.count("m").await, 0);
        assert!(refs.monitors_with_demand().await.is_empty());
        assert_eq!(recorder.stops("m"), 1);

        // A late release after reconciliation does not stop again
        refs.release("m").await;
        assert_eq!(recorder.stops("m"), 1);
    }

    #[tokio::test]
    async fn test_force_stop_if_skips_changed_count() {
        let (refs, recorder) = refs();
        refs.acquire("m").await;
        refs.acquire("m").await;

        assert_eq!(refs.force_stop_if("m", 1).await, 0);
        assert_eq!(refs.count("m").await, 2);
        assert_eq!(recorder.stops("m"), 0);

        assert_eq!(refs.force_stop_if("m", 2).await, 2);
        assert_eq!(refs.count("m").await, 0);
        assert_eq!(recorder.stops("m"), 1);
    }

    #[tokio::test]
    async fn test_edges_publish_camera_status() {
        let recorder = Arc::new(FakeRecorder::default());
        let (notifier, mut queue) = notification_dispatcher::channel();
        let refs = RecordingRefs::new(recorder, Some(notifier));

        refs.acquire("m").await;
        refs.acquire("m").await;
        refs.release("m").await;
        refs.release("m").await;

        let first = queue.try_recv().unwrap();
        assert_eq!(
            first.event,
            NotificationEvent::CameraStatusChanged {
                camera_id: "m".to_string(),
                camera_status: CameraStatus::Record
            }
        );
        let second = queue.try_recv().unwrap();
        assert!(matches!(
            second.event,
            NotificationEvent::CameraStatusChanged { camera_status: CameraStatus::Watching, .. }
        ));
        assert!(queue.try_recv().is_err());
    }
}
