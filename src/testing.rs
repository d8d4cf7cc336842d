//! In-process fakes for the engine's collaborators.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::db::SessionStore;
use crate::models::{ActiveCheckpoint, Judgment, RecordUpdate, SessionRecord};
use crate::monitor::alert::{AlertKind, AlertSink};
use crate::sensing::{CaptureError, ClassificationError, Classifier, Frame, ImageSource};

fn tiny_frame() -> Frame {
    Frame {
        captured_at: Utc::now(),
        width: 1,
        height: 1,
        bytes: Arc::new(vec![0]),
    }
}

/// Always returns a 1x1 frame immediately.
pub struct StaticSource;

#[async_trait]
impl ImageSource for StaticSource {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        Ok(tiny_frame())
    }
}

/// Holds every capture until [`GatedSource::open`] is called.
pub struct GatedSource {
    gate: watch::Sender<bool>,
    fail: bool,
}

impl GatedSource {
    pub fn closed() -> Self {
        let (gate, _) = watch::channel(false);
        Self { gate, fail: false }
    }

    pub fn failing() -> Self {
        let (gate, _) = watch::channel(true);
        Self { gate, fail: true }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl ImageSource for GatedSource {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        if self.fail {
            return Err(CaptureError::Other("camera unavailable".into()));
        }
        let mut rx = self.gate.subscribe();
        if rx.wait_for(|open| *open).await.is_err() {
            return Err(CaptureError::Other("gate dropped".into()));
        }
        Ok(tiny_frame())
    }
}

/// Answers calls in order from a script; `None` entries fail.
pub struct ScriptedClassifier {
    script: Vec<Option<Judgment>>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Option<Judgment>>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _frame: &Frame) -> Result<Judgment, ClassificationError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.get(index) {
            Some(Some(judgment)) => Ok(*judgment),
            Some(None) => Err(ClassificationError::Model("scripted failure".into())),
            None => Err(ClassificationError::Model("script exhausted".into())),
        }
    }
}

#[derive(Default)]
pub struct RecordingAlertSink {
    fired: Mutex<Vec<AlertKind>>,
}

impl RecordingAlertSink {
    pub fn fired(&self) -> Vec<AlertKind> {
        self.fired.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn fire(&self, alert: &AlertKind) -> Result<()> {
        self.fired.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub struct FailingAlertSink;

#[async_trait]
impl AlertSink for FailingAlertSink {
    async fn fire(&self, _alert: &AlertKind) -> Result<()> {
        bail!("no haptic capability")
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SessionRecord>>,
    checkpoint: Mutex<Option<ActiveCheckpoint>>,
    fail_persist: AtomicBool,
    persist_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn checkpoint(&self) -> Option<ActiveCheckpoint> {
        self.checkpoint.lock().unwrap().clone()
    }

    pub fn set_checkpoint(&self, checkpoint: ActiveCheckpoint) {
        *self.checkpoint.lock().unwrap() = Some(checkpoint);
    }

    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_persist.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|existing| existing.id == record.id) {
            bail!("record {} already exists", record.id);
        }
        records.push(record.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<SessionRecord>> {
        Ok(self.records.lock().unwrap().last().cloned())
    }

    async fn update(&self, record_id: &str, update: RecordUpdate) -> Result<SessionRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|record| record.id == record_id)
            .ok_or_else(|| anyhow!("record {record_id} not found"))?;
        if let Some(label) = update.label {
            record.label = label;
        }
        if let Some(minutes) = update.duration_minutes {
            record.duration_minutes = minutes;
        }
        Ok(record.clone())
    }

    async fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()> {
        self.set_checkpoint(checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>> {
        Ok(self.checkpoint())
    }

    async fn clear_checkpoint(&self, session_id: &str) -> Result<()> {
        let mut guard = self.checkpoint.lock().unwrap();
        if guard.as_ref().map(|cp| cp.session_id == session_id).unwrap_or(false) {
            *guard = None;
        }
        Ok(())
    }
}
