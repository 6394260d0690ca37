//! Access gate domain: states, per-cycle detection snapshots, the access
//! session, decision records, and status events.
//!
//! The [`engine::DecisionEngine`] is the only writer of [`AccessSession`].
//! Everything else in this module is plain data passed between the cadence
//! loop, the publisher, and the audit sinks.

pub mod compliance;
pub mod engine;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical object-detector label for a person in frame.
pub const OCCUPANT_LABEL: &str = "Person";

/// Display name assigned when the identity check is waived.
pub const PLACEHOLDER_NAME: &str = "Anonymous User";

/// The six states of an access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessState {
    /// Nobody is being processed.
    Idle,
    /// A face is in frame, waiting for a match.
    FaceDetecting,
    /// The face matched an authorized person.
    FaceRecognized,
    /// Evaluating detected equipment against the compliance policy.
    PpeChecking,
    /// Entry granted; shown for the display duration.
    AccessGranted,
    /// Entry denied; shown for the display duration.
    AccessDenied,
}

impl AccessState {
    /// Wire name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::FaceDetecting => "FACE_DETECTING",
            Self::FaceRecognized => "FACE_RECOGNIZED",
            Self::PpeChecking => "PPE_CHECKING",
            Self::AccessGranted => "ACCESS_GRANTED",
            Self::AccessDenied => "ACCESS_DENIED",
        }
    }

    /// Whether this is a terminal-display state (granted or denied).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AccessGranted | Self::AccessDenied)
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top edge.
    pub top: u32,
    /// Right edge.
    pub right: u32,
    /// Bottom edge.
    pub bottom: u32,
    /// Left edge.
    pub left: u32,
}

/// Result of one face recognizer call.
///
/// A recognizer that sees no face returns `None` instead of this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    /// Whether the face matched an enrolled person.
    #[serde(default)]
    pub matched: bool,
    /// Matched person's identifier.
    #[serde(default)]
    pub person_id: Option<i64>,
    /// Matched person's display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Matched person's employee identifier.
    #[serde(default)]
    pub employee_id: Option<String>,
    /// Match similarity.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Where the face was located in the frame.
    #[serde(default)]
    pub face_location: Option<BoundingBox>,
}

impl FaceResult {
    /// Whether a face was actually located in the frame.
    pub fn is_located(&self) -> bool {
        self.face_location.is_some()
    }
}

/// Result of one object detector call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectResult {
    /// Distinct labels seen, in detection order.
    #[serde(default)]
    pub detected_labels: Vec<String>,
    /// Highest confidence per label.
    #[serde(default)]
    pub confidence: HashMap<String, f64>,
    /// Number of boxes per label.
    #[serde(default)]
    pub counts: HashMap<String, u32>,
}

impl ObjectResult {
    /// Number of detections for `label`, compared case-insensitively.
    pub fn count_of(&self, label: &str) -> u32 {
        self.counts
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(label))
            .fold(0u32, |acc, (_, n)| acc.saturating_add(*n))
    }

    /// Number of people in frame.
    pub fn occupant_count(&self) -> u32 {
        self.count_of(OCCUPANT_LABEL)
    }
}

/// The paired recognizer outputs for one cadence cycle. Consumed once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    /// Face recognizer output; `None` when no face was seen or the check is off.
    #[serde(default)]
    pub face: Option<FaceResult>,
    /// Object detector output.
    #[serde(default)]
    pub objects: ObjectResult,
}

impl DetectionSnapshot {
    /// Whether the snapshot carries a located face.
    pub fn face_located(&self) -> bool {
        self.face.as_ref().is_some_and(FaceResult::is_located)
    }
}

/// Identity attached to the current access attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Authorized person's identifier; `None` for the placeholder identity.
    pub person_id: Option<i64>,
    /// Display name.
    pub name: Option<String>,
    /// Employee identifier.
    pub employee_id: Option<String>,
    /// Face match confidence.
    pub confidence: Option<f64>,
}

impl Identity {
    /// Identity used when the identity check is disabled.
    pub fn placeholder() -> Self {
        Self {
            name: Some(PLACEHOLDER_NAME.to_owned()),
            ..Self::default()
        }
    }

    /// Capture the identity carried by a matched face.
    pub fn from_face(face: &FaceResult) -> Self {
        Self {
            person_id: face.person_id,
            name: face.name.clone(),
            employee_id: face.employee_id.clone(),
            confidence: face.confidence,
        }
    }
}

/// The in-flight access attempt. Owned and mutated only by the decision engine.
///
/// `person` is `None` whenever `state` is [`AccessState::Idle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessSession {
    /// Current state.
    pub state: AccessState,
    /// Identified person, if any.
    pub person: Option<Identity>,
    /// Labels from the most recent snapshot.
    pub detected_labels: Vec<String>,
    /// When the current state was entered.
    pub state_entered_at: DateTime<Utc>,
    /// When access was granted; set only on entry into `ACCESS_GRANTED`.
    pub granted_at: Option<DateTime<Utc>>,
}

impl AccessSession {
    /// Fresh idle session stamped at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: AccessState::Idle,
            person: None,
            detected_labels: Vec::new(),
            state_entered_at: now,
            granted_at: None,
        }
    }

    /// Time spent in the current state. Clock skew reads as zero.
    pub fn time_in_state(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.state_entered_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Identifier of an authorized person captured from a face match.
    pub fn authorized_person_id(&self) -> Option<i64> {
        self.person.as_ref().and_then(|p| p.person_id)
    }

    /// Display name of the current person.
    pub fn person_name(&self) -> Option<&str> {
        self.person.as_ref().and_then(|p| p.name.as_deref())
    }
}

/// Why an attempt was denied. The display text is shown to the person at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// A face was seen but never matched.
    UnknownPerson,
    /// Required equipment was not detected in time.
    PpeIncomplete,
    /// More than one person in frame.
    MultipleOccupants {
        /// How many people were counted.
        count: u32,
    },
    /// Identity check is on but no authorized person was captured.
    Unauthorized,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPerson => f.write_str("Unknown person - Face not recognized"),
            Self::PpeIncomplete => f.write_str("PPE requirements not met"),
            Self::MultipleOccupants { count } => write!(
                f,
                "Multiple people detected ({count}). Please enter one at a time."
            ),
            Self::Unauthorized => f.write_str("Unauthorized - Face recognition required"),
        }
    }
}

/// Write-once audit record, created exactly once per terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecisionRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Authorized person's identifier.
    pub person_id: Option<i64>,
    /// Display name, `"Unknown"` when nobody was identified.
    pub person_name: String,
    /// Employee identifier.
    pub employee_id: Option<String>,
    /// Whether the identity check passed (true when it was waived).
    pub identity_matched: bool,
    /// Face match confidence.
    pub identity_confidence: Option<f64>,
    /// Labels detected at decision time.
    pub detected_labels: Vec<String>,
    /// Whether the compliance policy was satisfied.
    pub compliance_satisfied: bool,
    /// Final outcome.
    pub granted: bool,
    /// Reason for a denial.
    pub denial_reason: Option<DenialReason>,
    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Notification emitted on every transition and reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// State after the transition.
    pub state: AccessState,
    /// Current person's identifier.
    pub person_id: Option<i64>,
    /// Current person's display name.
    pub person_name: Option<String>,
    /// Face match confidence.
    pub confidence: Option<f64>,
    /// Labels from the most recent snapshot.
    pub detected_labels: Vec<String>,
    /// Human-readable status line.
    pub message: String,
    /// How long observers should show the granted state. Present only on grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_display_secs: Option<u64>,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

/// Consistent copy of the session handed to status readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    /// Session as of the end of the last cycle.
    pub session: AccessSession,
    /// Time spent in the current state when the status was taken.
    pub time_in_state: Duration,
}

/// Default status line for a state.
pub fn default_message(state: AccessState, person_name: Option<&str>) -> String {
    match state {
        AccessState::Idle => "Please stand in front of camera".to_owned(),
        AccessState::FaceDetecting => "Detecting face...".to_owned(),
        AccessState::FaceRecognized => {
            format!("Identity verified: {}", person_name.unwrap_or("Unknown"))
        }
        AccessState::PpeChecking => "Checking PPE equipment...".to_owned(),
        AccessState::AccessGranted => "Welcome! Door opening...".to_owned(),
        AccessState::AccessDenied => "Access denied".to_owned(),
    }
}
