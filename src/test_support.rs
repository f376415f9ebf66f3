//! In-memory collaborator fakes for tests

use crate::detection_adapter::Detector;
use crate::directory_client::{Directory, FindingRecord, KnownUser, MonitorInfo, RemovedRecord};
use crate::error::{Error, Result};
use crate::models::{BoundingBox, FaceObservation, Frame, IncidentId};
use crate::object_storage::ObjectStorage;
use crate::recorder_client::Recorder;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

pub fn test_frame(width: u32, height: u32) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb([90, 120, 150])))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderCall {
    Start(String),
    Stop(String),
}

#[derive(Default)]
pub struct FakeRecorder {
    calls: Mutex<Vec<RecorderCall>>,
    fail: AtomicBool,
}

impl FakeRecorder {
    pub fn calls(&self) -> Vec<RecorderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn starts(&self, monitor_id: &str) -> usize {
        self.count(&RecorderCall::Start(monitor_id.to_string()))
    }

    pub fn stops(&self, monitor_id: &str) -> usize {
        self.count(&RecorderCall::Stop(monitor_id.to_string()))
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn count(&self, call: &RecorderCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: RecorderCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Recorder("recorder unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn start_recording(&self, monitor_id: &str) -> Result<()> {
        self.record(RecorderCall::Start(monitor_id.to_string()))
    }

    async fn stop_recording(&self, monitor_id: &str) -> Result<()> {
        self.record(RecorderCall::Stop(monitor_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryCall {
    CreateIncident(String),
    AppendCamera(IncidentId, String),
    ReportShooters(IncidentId, String, Vec<String>),
    EndIncident(IncidentId),
    ReportFindings { new: Vec<FindingRecord>, removed: Vec<RemovedRecord> },
}

pub struct FakeDirectory {
    calls: Mutex<Vec<DirectoryCall>>,
    next_incident: AtomicI64,
    fail_create: AtomicBool,
    fail_findings: AtomicBool,
    pub known_users: Mutex<Vec<KnownUser>>,
    pub monitors: Mutex<Vec<MonitorInfo>>,
}

impl Default for FakeDirectory {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_incident: AtomicI64::new(100),
            fail_create: AtomicBool::new(false),
            fail_findings: AtomicBool::new(false),
            known_users: Mutex::new(Vec::new()),
            monitors: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDirectory {
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_incidents(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, DirectoryCall::CreateIncident(_)))
            .count()
    }

    /// All reported new findings, flattened
    pub fn reported_new(&self) -> Vec<FindingRecord> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DirectoryCall::ReportFindings { new, .. } => Some(new),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// All reported removals, flattened
    pub fn reported_removed(&self) -> Vec<RemovedRecord> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DirectoryCall::ReportFindings { removed, .. } => Some(removed),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_findings(&self, fail: bool) {
        self.fail_findings.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: DirectoryCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn create_incident(&self, monitor_id: &str) -> Result<IncidentId> {
        self.record(DirectoryCall::CreateIncident(monitor_id.to_string()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Directory("create rejected".to_string()));
        }
        Ok(self.next_incident.fetch_add(1, Ordering::SeqCst))
    }

    async fn append_incident_camera(&self, incident_id: IncidentId, monitor_id: &str) -> Result<()> {
        self.record(DirectoryCall::AppendCamera(incident_id, monitor_id.to_string()));
        Ok(())
    }

    async fn report_shooters(
        &self,
        incident_id: IncidentId,
        monitor_id: &str,
        shooter_ids: &[String],
    ) -> Result<()> {
        self.record(DirectoryCall::ReportShooters(
            incident_id,
            monitor_id.to_string(),
            shooter_ids.to_vec(),
        ));
        Ok(())
    }

    async fn end_incident(&self, incident_id: IncidentId) -> Result<()> {
        self.record(DirectoryCall::EndIncident(incident_id));
        Ok(())
    }

    async fn report_findings(&self, new: &[FindingRecord], removed: &[RemovedRecord]) -> Result<()> {
        self.record(DirectoryCall::ReportFindings {
            new: new.to_vec(),
            removed: removed.to_vec(),
        });
        if self.fail_findings.load(Ordering::SeqCst) {
            return Err(Error::Directory("findings rejected".to_string()));
        }
        Ok(())
    }

    async fn fetch_known_users(&self) -> Result<Vec<KnownUser>> {
        Ok(self.known_users.lock().unwrap().clone())
    }

    async fn fetch_monitors(&self) -> Result<Vec<MonitorInfo>> {
        Ok(self.monitors.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    puts: Mutex<Vec<String>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl FakeStorage {
    /// Keys of every successful put
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn insert_object(&self, url: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(url.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_face_image(&self, bytes: Vec<u8>, key: &str) -> Result<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::Storage("bucket unavailable".to_string()));
        }
        let url = format!("mem://faces/{}", key);
        self.puts.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn get_object(&self, url: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::NotFound(url.to_string()))
    }
}

/// Detector returning whatever boxes are currently scripted
#[derive(Default)]
pub struct FakeDetector {
    weapons: Mutex<Vec<BoundingBox>>,
    faces: Mutex<Vec<FaceObservation>>,
    weapon_calls: Mutex<usize>,
    face_calls: Mutex<usize>,
}

impl FakeDetector {
    pub fn set_weapons(&self, weapons: Vec<BoundingBox>) {
        *self.weapons.lock().unwrap() = weapons;
    }

    pub fn set_faces(&self, faces: Vec<FaceObservation>) {
        *self.faces.lock().unwrap() = faces;
    }

    pub fn weapon_calls(&self) -> usize {
        *self.weapon_calls.lock().unwrap()
    }

    pub fn face_calls(&self) -> usize {
        *self.face_calls.lock().unwrap()
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn detect_weapons(&self, _frame: &Frame) -> Result<Vec<BoundingBox>> {
        *self.weapon_calls.lock().unwrap() += 1;
        Ok(self.weapons.lock().unwrap().clone())
    }

    async fn detect_faces(&self, _frame: &Frame) -> Result<Vec<FaceObservation>> {
        *self.face_calls.lock().unwrap() += 1;
        Ok(self.faces.lock().unwrap().clone())
    }
}
