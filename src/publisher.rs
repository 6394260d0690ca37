//! Status publisher: pushes gate events to an optional observer.
//!
//! The observer side is an `mpsc` receiver (UI bridge, CLI logger, test).
//! Without one every publish is a no-op. Publishing never blocks the
//! cadence worker: a full queue drops the event with a warning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::gate::{DetectionSnapshot, StatusEvent};

/// Event delivered to status observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
    /// A state transition or reset.
    AccessStatusChange(StatusEvent),
    /// Raw detections from the latest cycle.
    DetectionUpdate(DetectionUpdate),
    /// A face was located this cycle.
    FaceIdentified(FaceIdentified),
}

/// Per-cycle object detection summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionUpdate {
    /// Distinct labels seen.
    pub detected_labels: Vec<String>,
    /// Highest confidence per label.
    pub confidence: HashMap<String, f64>,
    /// Boxes per label.
    pub counts: HashMap<String, u32>,
    /// Whether a face was located.
    pub face_detected: bool,
}

/// Per-cycle face recognizer summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceIdentified {
    /// Whether the face matched an enrolled person.
    pub matched: bool,
    /// Matched person's identifier.
    pub person_id: Option<i64>,
    /// Matched person's display name.
    pub name: Option<String>,
    /// Match similarity.
    pub confidence: Option<f64>,
}

/// Sender half of the status channel. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    tx: Option<mpsc::Sender<GateEvent>>,
}

impl StatusPublisher {
    /// Publisher with a bounded queue and its observer end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GateEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Publisher with no observer.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Whether an observer is attached.
    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue `event` for the observer.
    pub fn publish(&self, event: GateEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("status observer is lagging, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("status observer gone");
            }
        }
    }

    /// Publish a transition.
    pub fn status_changed(&self, event: StatusEvent) {
        self.publish(GateEvent::AccessStatusChange(event));
    }

    /// Publish the raw detections of a cycle, plus the face summary when one was located.
    pub fn detections(&self, snapshot: &DetectionSnapshot) {
        if self.tx.is_none() {
            return;
        }
        self.publish(GateEvent::DetectionUpdate(DetectionUpdate {
            detected_labels: snapshot.objects.detected_labels.clone(),
            confidence: snapshot.objects.confidence.clone(),
            counts: snapshot.objects.counts.clone(),
            face_detected: snapshot.face_located(),
        }));
        if let Some(face) = snapshot.face.as_ref().filter(|f| f.is_located()) {
            self.publish(GateEvent::FaceIdentified(FaceIdentified {
                matched: face.matched,
                person_id: face.person_id,
                name: face.name.clone(),
                confidence: face.confidence,
            }));
        }
    }
}
