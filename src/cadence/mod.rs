//! Cadence loop controller.
//!
//! [`GateController`] owns the collaborator handles and the single worker
//! task that drives the decision engine. Other callers (request handlers,
//! signal handlers) only read status, reload settings, or start/stop it.

pub mod budget;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::budget::{Clock, CycleBudget};
use self::worker::CycleRunner;
use crate::audit::AuditSink;
use crate::gate::engine::{DecisionEngine, GateTimings};
use crate::gate::{AccessSession, SessionStatus};
use crate::publisher::StatusPublisher;
use crate::sensors::{Camera, FaceRecognizer, ObjectDetector, SensorError, SensorProvider};
use crate::settings::{ComplianceConfigProvider, SettingsProvider};

/// Shared, lazily filled face recognizer handle.
pub(crate) type RecognizerSlot = Arc<RwLock<Option<Arc<dyn FaceRecognizer>>>>;

/// Errors from controller lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// `start` was called while a worker is running.
    #[error("gate controller is already running")]
    AlreadyRunning,

    /// A start-up resource could not be acquired.
    #[error("failed to acquire {resource}: {source}")]
    Acquisition {
        /// Which resource.
        resource: &'static str,
        /// Underlying collaborator error.
        #[source]
        source: SensorError,
    },
}

/// Worker scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceSettings {
    /// Per-cycle time budget.
    pub budget: CycleBudget,
    /// How long `stop` waits for the worker to exit.
    pub stop_timeout: Duration,
    /// Pause after a failed cycle.
    pub error_backoff: Duration,
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            budget: CycleBudget::default(),
            stop_timeout: Duration::from_secs(2),
            error_backoff: Duration::from_millis(100),
        }
    }
}

/// Collaborators the controller is wired with.
pub struct GateDeps {
    /// Camera, detector, and recognizer factory.
    pub sensors: Arc<dyn SensorProvider>,
    /// Live settings.
    pub settings: Arc<SettingsProvider>,
    /// Decision record sink.
    pub audit: Arc<dyn AuditSink>,
    /// Status observer channel.
    pub publisher: StatusPublisher,
    /// Time source for the engine.
    pub clock: Arc<dyn Clock>,
}

struct Resources {
    camera: Arc<dyn Camera>,
    detector: Arc<dyn ObjectDetector>,
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    resources: Resources,
}

/// Owns the cadence worker and its collaborator handles.
pub struct GateController {
    deps: GateDeps,
    timings: GateTimings,
    cadence: CadenceSettings,
    identity_enabled: Arc<AtomicBool>,
    recognizer: RecognizerSlot,
    status_tx: watch::Sender<AccessSession>,
    worker: Mutex<Option<Worker>>,
}

impl GateController {
    /// Controller in the stopped state.
    pub fn new(deps: GateDeps, timings: GateTimings, cadence: CadenceSettings) -> Self {
        let (status_tx, _) = watch::channel(AccessSession::new(deps.clock.now()));
        Self {
            deps,
            timings,
            cadence,
            identity_enabled: Arc::new(AtomicBool::new(true)),
            recognizer: Arc::new(RwLock::new(None)),
            status_tx,
            worker: Mutex::new(None),
        }
    }

    /// Acquire the camera and detector, then spawn the worker.
    ///
    /// A recognizer that fails to load is not fatal: the gate runs on object
    /// detection alone until a reload succeeds.
    ///
    /// # Errors
    ///
    /// [`GateError::AlreadyRunning`] if a worker is live, or
    /// [`GateError::Acquisition`] if the camera or detector cannot be
    /// acquired. No worker is left running on error.
    pub async fn start(&self) -> Result<(), GateError> {
        let mut slot = self.worker.lock().await;
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            warn!("gate controller already running");
            return Err(GateError::AlreadyRunning);
        }
        if let Some(dead) = slot.take() {
            warn!("previous cadence worker ended on its own, releasing its resources");
            self.release(&dead.resources);
        }

        let enabled = self.deps.settings.identity_check_enabled();
        self.identity_enabled.store(enabled, Ordering::SeqCst);

        info!("opening camera");
        let camera = self
            .deps
            .sensors
            .open_camera()
            .await
            .map_err(|source| GateError::Acquisition {
                resource: "camera",
                source,
            })?;

        info!("loading object detector");
        let detector = match self.deps.sensors.load_detector().await {
            Ok(detector) => detector,
            Err(source) => {
                release_camera(camera.as_ref());
                return Err(GateError::Acquisition {
                    resource: "object detector",
                    source,
                });
            }
        };

        if enabled {
            if !self.has_recognizer() {
                self.ensure_recognizer().await;
            }
        } else {
            info!("identity check disabled by settings");
        }

        let now = self.deps.clock.now();
        let engine = DecisionEngine::new(
            self.timings,
            Arc::clone(&self.deps.settings) as Arc<dyn ComplianceConfigProvider>,
            now,
        )
        .with_identity_check(enabled);
        self.status_tx.send_replace(engine.session().clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = CycleRunner {
            camera: Arc::clone(&camera),
            detector: Arc::clone(&detector),
            recognizer: Arc::clone(&self.recognizer),
            identity_enabled: Arc::clone(&self.identity_enabled),
            engine,
            publisher: self.deps.publisher.clone(),
            audit: Arc::clone(&self.deps.audit),
            clock: Arc::clone(&self.deps.clock),
            status_tx: self.status_tx.clone(),
            budget: self.cadence.budget,
            error_backoff: self.cadence.error_backoff,
        };
        let handle = tokio::spawn(worker::run(runner, shutdown_rx));

        *slot = Some(Worker {
            handle,
            shutdown: shutdown_tx,
            resources: Resources { camera, detector },
        });
        info!(identity_check = enabled, "gate controller started");
        Ok(())
    }

    /// Signal the worker, wait up to the stop timeout, then release resources.
    ///
    /// Resources are released whether or not the worker exited in time.
    /// Returns `true` if the worker exited (or none was running). The worker
    /// slot stays locked until release finishes, so a concurrent `start`
    /// waits rather than racing the old worker.
    pub async fn stop(&self) -> bool {
        let mut slot = self.worker.lock().await;
        let Some(mut worker) = slot.take() else {
            debug!("gate controller not running");
            return true;
        };

        // The receiver may already be gone if the worker exited on its own.
        let _ = worker.shutdown.send(true);

        let exited = match tokio::time::timeout(self.cadence.stop_timeout, &mut worker.handle).await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "cadence worker ended abnormally");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(self.cadence.stop_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                    "cadence worker did not exit in time, releasing resources anyway"
                );
                worker.handle.abort();
                false
            }
        };

        self.release(&worker.resources);
        drop(slot);
        info!("gate controller stopped");
        exited
    }

    /// Re-read the identity toggle and invalidate the cached compliance policy.
    ///
    /// Turning the check on without a recognizer loads one for the running
    /// worker; while stopped, the next `start` loads it. Turning it off keeps
    /// an existing recognizer around.
    pub async fn reload_config(&self) {
        let slot = self.worker.lock().await;
        self.deps.settings.invalidate();
        let enabled = self.deps.settings.identity_check_enabled();
        let previous = self.identity_enabled.swap(enabled, Ordering::SeqCst);
        info!(identity_check = enabled, previous, "gate settings reloaded");

        let running = slot.as_ref().is_some_and(|w| !w.handle.is_finished());
        if enabled && running && !self.has_recognizer() {
            self.ensure_recognizer().await;
        }
    }

    /// Consistent copy of the session as of the last completed cycle.
    pub fn status(&self) -> SessionStatus {
        let session = self.status_tx.borrow().clone();
        let time_in_state = session.time_in_state(self.deps.clock.now());
        SessionStatus {
            session,
            time_in_state,
        }
    }

    /// Receiver that sees every session update.
    pub fn subscribe_status(&self) -> watch::Receiver<AccessSession> {
        self.status_tx.subscribe()
    }

    /// Whether a worker is live.
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Whether the identity check is currently requested by settings.
    pub fn identity_check_requested(&self) -> bool {
        self.identity_enabled.load(Ordering::SeqCst)
    }

    /// Whether a face recognizer instance exists.
    pub fn has_recognizer(&self) -> bool {
        self.recognizer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn ensure_recognizer(&self) {
        info!("loading face recognizer");
        match self.deps.sensors.load_recognizer().await {
            Ok(recognizer) => {
                let mut slot = self.recognizer.write().unwrap_or_else(PoisonError::into_inner);
                if slot.is_some() {
                    recognizer.release();
                } else {
                    *slot = Some(recognizer);
                }
            }
            Err(e) => {
                warn!(error = %e, "face recognizer unavailable, continuing with object detection only");
            }
        }
    }

    /// Release in reverse acquisition order: recognizer, detector, camera.
    fn release(&self, resources: &Resources) {
        let recognizer = self
            .recognizer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(recognizer) = recognizer {
            recognizer.release();
        }
        resources.detector.release();
        release_camera(resources.camera.as_ref());
    }
}

fn release_camera(camera: &dyn Camera) {
    if let Err(e) = camera.release() {
        warn!(error = %e, "camera release failed");
    }
}
