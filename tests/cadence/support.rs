//! Scriptable collaborators shared by the cadence tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use turnstile::audit::AuditSink;
use turnstile::cadence::budget::MonotonicClock;
use turnstile::cadence::{CadenceSettings, GateController, GateDeps};
use turnstile::gate::compliance::{ComplianceConfig, MatchMode};
use turnstile::gate::engine::GateTimings;
use turnstile::gate::{AccessDecisionRecord, BoundingBox, DetectionSnapshot, FaceResult, ObjectResult};
use turnstile::publisher::{GateEvent, StatusPublisher};
use turnstile::sensors::{
    Camera, FaceRecognizer, Frame, ObjectDetector, SensorError, SensorProvider,
};
use turnstile::settings::{GateSettings, MemorySettingsStore, SettingsProvider, SettingsStore};

/// Shared knobs and observations for one fake sensor rig.
#[derive(Default)]
pub struct Rig {
    pub scene: Mutex<DetectionSnapshot>,
    pub log: Mutex<Vec<&'static str>>,
    pub fail_camera: AtomicBool,
    pub fail_detector: AtomicBool,
    pub fail_recognizer: AtomicBool,
    pub failing_detects: AtomicU32,
    pub hang_detect: AtomicBool,
    pub detect_calls: AtomicU32,
    pub identify_calls: AtomicU32,
    pub recognizer_loads: AtomicU32,
}

impl Rig {
    pub fn set_scene(&self, scene: DetectionSnapshot) {
        *self.scene.lock().unwrap_or_else(PoisonError::into_inner) = scene;
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn note(&self, entry: &'static str) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    fn scene(&self) -> DetectionSnapshot {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

pub struct FakeSensors(pub Arc<Rig>);

#[async_trait]
impl SensorProvider for FakeSensors {
    async fn open_camera(&self) -> Result<Arc<dyn Camera>, SensorError> {
        if self.0.fail_camera.load(Ordering::SeqCst) {
            return Err(SensorError::Unavailable {
                resource: "camera",
                reason: "no device".to_owned(),
            });
        }
        self.0.note("open camera");
        Ok(Arc::new(FakeCamera {
            rig: Arc::clone(&self.0),
            next: AtomicU32::new(0),
        }))
    }

    async fn load_detector(&self) -> Result<Arc<dyn ObjectDetector>, SensorError> {
        if self.0.fail_detector.load(Ordering::SeqCst) {
            return Err(SensorError::Unavailable {
                resource: "object detector",
                reason: "weights missing".to_owned(),
            });
        }
        self.0.note("load detector");
        Ok(Arc::new(FakeDetector(Arc::clone(&self.0))))
    }

    async fn load_recognizer(&self) -> Result<Arc<dyn FaceRecognizer>, SensorError> {
        if self.0.fail_recognizer.load(Ordering::SeqCst) {
            return Err(SensorError::Unavailable {
                resource: "face recognizer",
                reason: "no enrolled faces".to_owned(),
            });
        }
        self.0.recognizer_loads.fetch_add(1, Ordering::SeqCst);
        self.0.note("load recognizer");
        Ok(Arc::new(FakeRecognizer(Arc::clone(&self.0))))
    }
}

struct FakeCamera {
    rig: Arc<Rig>,
    next: AtomicU32,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn read_frame(&self) -> Result<Frame, SensorError> {
        Ok(Frame {
            sequence: u64::from(self.next.fetch_add(1, Ordering::SeqCst)),
            captured_at: Utc::now(),
            width: 4,
            height: 4,
            pixels: Vec::new(),
        })
    }

    fn release(&self) -> Result<(), SensorError> {
        self.rig.note("release camera");
        Ok(())
    }
}

struct FakeDetector(Arc<Rig>);

#[async_trait]
impl ObjectDetector for FakeDetector {
    async fn detect(&self, _frame: &Frame) -> Result<ObjectResult, SensorError> {
        self.0.detect_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.hang_detect.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let failing = self
            .0
            .failing_detects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SensorError::Inference("detector hiccup".to_owned()));
        }
        Ok(self.0.scene().objects)
    }

    fn release(&self) {
        self.0.note("release detector");
    }
}

struct FakeRecognizer(Arc<Rig>);

#[async_trait]
impl FaceRecognizer for FakeRecognizer {
    async fn identify(&self, _frame: &Frame) -> Result<Option<FaceResult>, SensorError> {
        self.0.identify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.0.scene().face)
    }

    fn release(&self) {
        self.0.note("release recognizer");
    }
}

/// Audit sink that keeps records in memory and can be told to fail.
#[derive(Default)]
pub struct MemoryAudit {
    pub records: Mutex<Vec<AccessDecisionRecord>>,
    pub fail: AtomicBool,
}

impl MemoryAudit {
    pub fn records(&self) -> Vec<AccessDecisionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn append(&self, record: &AccessDecisionRecord) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// A controller wired to fakes, plus handles on every fake.
pub struct Harness {
    pub controller: GateController,
    pub rig: Arc<Rig>,
    pub audit: Arc<MemoryAudit>,
    pub store: Arc<MemorySettingsStore>,
    pub events: mpsc::Receiver<GateEvent>,
}

impl Harness {
    /// Build a stopped controller requiring `required` equipment.
    pub fn new(required: &[&str], identity_check_enabled: bool) -> Self {
        let rig = Arc::new(Rig::default());
        let audit = Arc::new(MemoryAudit::default());
        let store = Arc::new(MemorySettingsStore::new(settings(
            required,
            identity_check_enabled,
        )));
        let (publisher, events) = StatusPublisher::channel(1024);

        let deps = GateDeps {
            sensors: Arc::new(FakeSensors(Arc::clone(&rig))),
            settings: Arc::new(SettingsProvider::new(
                Arc::clone(&store) as Arc<dyn SettingsStore>,
                Duration::ZERO,
            )),
            audit: Arc::clone(&audit) as Arc<dyn AuditSink>,
            publisher,
            clock: Arc::new(MonotonicClock::new()),
        };
        let controller = GateController::new(deps, GateTimings::default(), CadenceSettings::default());

        Self {
            controller,
            rig,
            audit,
            store,
            events,
        }
    }

    /// Drain every event published so far.
    pub fn drain_events(&mut self) -> Vec<GateEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn settings(required: &[&str], identity_check_enabled: bool) -> GateSettings {
    GateSettings {
        identity_check_enabled,
        compliance: ComplianceConfig::new(required.iter().copied(), MatchMode::All),
    }
}

pub fn person_wearing(labels: &[&str]) -> DetectionSnapshot {
    let mut counts: HashMap<String, u32> = labels.iter().map(|l| ((*l).to_owned(), 1)).collect();
    counts.insert("Person".to_owned(), 1);
    DetectionSnapshot {
        face: None,
        objects: ObjectResult {
            detected_labels: labels.iter().map(|l| (*l).to_owned()).collect(),
            confidence: HashMap::new(),
            counts,
        },
    }
}

pub fn known_face_wearing(person_id: i64, labels: &[&str]) -> DetectionSnapshot {
    DetectionSnapshot {
        face: Some(FaceResult {
            matched: true,
            person_id: Some(person_id),
            name: Some("Grace Hopper".to_owned()),
            employee_id: Some("E-1906".to_owned()),
            confidence: Some(0.88),
            face_location: Some(BoundingBox {
                top: 10,
                right: 90,
                bottom: 90,
                left: 10,
            }),
        }),
        ..person_wearing(labels)
    }
}

pub fn crowd(people: u32) -> DetectionSnapshot {
    let mut scene = person_wearing(&["Person"]);
    scene.objects.counts.insert("Person".to_owned(), people);
    scene
}

/// Let the paused clock run for `ms` of virtual time.
pub async fn run_for(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
