//! The cadence worker: one detection cycle per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::budget::{Clock, CycleBudget};
use super::RecognizerSlot;
use crate::audit::AuditSink;
use crate::gate::engine::{DecisionEngine, Effect};
use crate::gate::{AccessSession, DetectionSnapshot};
use crate::publisher::StatusPublisher;
use crate::sensors::{Camera, ObjectDetector, SensorError};

/// Everything one worker needs. Owned by the spawned task.
pub(crate) struct CycleRunner {
    pub(crate) camera: Arc<dyn Camera>,
    pub(crate) detector: Arc<dyn ObjectDetector>,
    pub(crate) recognizer: RecognizerSlot,
    pub(crate) identity_enabled: Arc<AtomicBool>,
    pub(crate) engine: DecisionEngine,
    pub(crate) publisher: StatusPublisher,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) status_tx: watch::Sender<AccessSession>,
    pub(crate) budget: CycleBudget,
    pub(crate) error_backoff: Duration,
}

/// Run cycles until the shutdown flag flips or its sender goes away.
///
/// The flag is checked between cycles only; an in-flight collaborator call
/// is never interrupted.
pub(crate) async fn run(mut runner: CycleRunner, mut shutdown: watch::Receiver<bool>) {
    info!(
        period_ms = u64::try_from(runner.budget.period().as_millis()).unwrap_or(u64::MAX),
        "cadence loop started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        let pause = match runner.run_cycle().await {
            Ok(()) => runner.budget.remaining(started.elapsed()),
            Err(e) => {
                warn!(error = %e, "detection cycle failed, skipping");
                Some(runner.error_backoff)
            }
        };

        if let Some(pause) = pause {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!("cadence loop stopped");
}

impl CycleRunner {
    async fn run_cycle(&mut self) -> Result<(), SensorError> {
        let frame = self.camera.read_frame().await?;

        let recognizer = if self.identity_enabled.load(Ordering::SeqCst) {
            self.recognizer
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        } else {
            None
        };
        self.engine.set_identity_check(recognizer.is_some());

        let face = match recognizer {
            Some(recognizer) => recognizer.identify(&frame).await?,
            None => None,
        };
        let objects = self.detector.detect(&frame).await?;
        let snapshot = DetectionSnapshot { face, objects };

        let advance = self.engine.advance(&snapshot, self.clock.now());
        for effect in advance.effects {
            self.dispatch(effect).await;
        }

        self.status_tx.send_replace(self.engine.session().clone());
        self.publisher.detections(&snapshot);
        Ok(())
    }

    async fn dispatch(&self, effect: Effect) {
        match effect {
            Effect::Publish(event) => {
                debug!(state = %event.state, message = %event.message, "publishing status");
                self.publisher.status_changed(event);
            }
            Effect::Record(record) => {
                info!(
                    record_id = %record.id,
                    granted = record.granted,
                    person = %record.person_name,
                    "access decision"
                );
                if let Err(e) = self.audit.append(&record).await {
                    warn!(error = %e, record_id = %record.id, "failed to persist access decision");
                }
            }
        }
    }
}
