//! Decision engine: the access state machine.
//!
//! [`DecisionEngine::advance`] is fed one [`DetectionSnapshot`] per cadence
//! cycle together with the current time. It never performs I/O itself;
//! status notifications and audit records come back as [`Effect`]s for the
//! caller to dispatch in order.
//!
//! Transition table (elapsed = time in current state):
//!
//! | State | Condition | Next |
//! |---|---|---|
//! | any non-terminal | more than one occupant | `ACCESS_DENIED` |
//! | `IDLE` | identity check off | `PPE_CHECKING` (placeholder identity) |
//! | `IDLE` | face located | `FACE_DETECTING` |
//! | `FACE_DETECTING` | face matched | `FACE_RECOGNIZED` |
//! | `FACE_DETECTING` | face unmatched, elapsed > face timeout | `ACCESS_DENIED` |
//! | `FACE_DETECTING` | no face, elapsed > face timeout | reset |
//! | `FACE_RECOGNIZED` | always | `PPE_CHECKING` |
//! | `PPE_CHECKING` | identity check on, nobody authorized | `ACCESS_DENIED` |
//! | `PPE_CHECKING` | policy satisfied | `ACCESS_GRANTED` |
//! | `PPE_CHECKING` | elapsed > PPE timeout | `ACCESS_DENIED` |
//! | `ACCESS_GRANTED` / `ACCESS_DENIED` | elapsed > display duration | reset |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::compliance;
use super::{
    default_message, AccessDecisionRecord, AccessSession, AccessState, DenialReason,
    DetectionSnapshot, Identity, StatusEvent,
};
use crate::settings::ComplianceConfigProvider;

/// Timeouts that guard the state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTimings {
    /// How long to wait for a face match.
    pub face_timeout: Duration,
    /// How long to wait for compliant equipment.
    pub ppe_timeout: Duration,
    /// How long a grant or denial stays on screen.
    pub display_duration: Duration,
}

impl Default for GateTimings {
    fn default() -> Self {
        Self {
            face_timeout: Duration::from_secs(5),
            ppe_timeout: Duration::from_secs(3),
            display_duration: Duration::from_secs(5),
        }
    }
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Notify status observers.
    Publish(StatusEvent),
    /// Persist a terminal decision.
    Record(AccessDecisionRecord),
}

/// Outcome of one [`DecisionEngine::advance`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    /// State after the cycle.
    pub state: AccessState,
    /// Effects in the order the transitions produced them.
    pub effects: Vec<Effect>,
}

impl Advance {
    /// Status events produced this cycle.
    pub fn events(&self) -> impl Iterator<Item = &StatusEvent> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Publish(event) => Some(event),
            Effect::Record(_) => None,
        })
    }

    /// Decision records produced this cycle.
    pub fn records(&self) -> impl Iterator<Item = &AccessDecisionRecord> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Record(record) => Some(record),
            Effect::Publish(_) => None,
        })
    }
}

/// The access state machine. Single writer of its [`AccessSession`].
pub struct DecisionEngine {
    session: AccessSession,
    timings: GateTimings,
    identity_check: bool,
    compliance: Arc<dyn ComplianceConfigProvider>,
}

impl DecisionEngine {
    /// Idle engine with the identity check enabled.
    pub fn new(
        timings: GateTimings,
        compliance: Arc<dyn ComplianceConfigProvider>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session: AccessSession::new(now),
            timings,
            identity_check: true,
            compliance,
        }
    }

    /// Builder-style identity check toggle.
    #[must_use]
    pub fn with_identity_check(mut self, enabled: bool) -> Self {
        self.identity_check = enabled;
        self
    }

    /// Toggle the identity check for subsequent cycles.
    pub fn set_identity_check(&mut self, enabled: bool) {
        if self.identity_check != enabled {
            info!(identity_check = enabled, "identity check toggled");
        }
        self.identity_check = enabled;
    }

    /// Whether the identity check is currently enforced.
    pub fn identity_check(&self) -> bool {
        self.identity_check
    }

    /// Current session.
    pub fn session(&self) -> &AccessSession {
        &self.session
    }

    /// Current state.
    pub fn state(&self) -> AccessState {
        self.session.state
    }

    /// Configured timings.
    pub fn timings(&self) -> GateTimings {
        self.timings
    }

    /// Advance the state machine by one cycle.
    pub fn advance(&mut self, snapshot: &DetectionSnapshot, now: DateTime<Utc>) -> Advance {
        let mut effects = Vec::new();
        let elapsed = self.session.time_in_state(now);
        self.session.detected_labels = snapshot.objects.detected_labels.clone();

        let occupants = snapshot.objects.occupant_count();
        if occupants > 1 && !self.session.state.is_terminal() {
            warn!(occupants, "multiple occupants in frame");
            self.deny(
                DenialReason::MultipleOccupants { count: occupants },
                false,
                now,
                &mut effects,
            );
            return self.finish(effects);
        }

        match self.session.state {
            AccessState::Idle => self.on_idle(snapshot, now, &mut effects),
            AccessState::FaceDetecting => {
                self.on_face_detecting(snapshot, elapsed, now, &mut effects);
            }
            AccessState::FaceRecognized => {
                self.transition(AccessState::PpeChecking, None, now, &mut effects);
            }
            AccessState::PpeChecking => self.on_ppe_checking(elapsed, now, &mut effects),
            AccessState::AccessGranted | AccessState::AccessDenied => {
                if elapsed > self.timings.display_duration {
                    effects.push(Effect::Publish(self.reset(now)));
                }
            }
        }

        self.finish(effects)
    }

    /// Return to `IDLE`, clearing every session field. Idempotent.
    ///
    /// Returns the status event announcing the reset.
    pub fn reset(&mut self, now: DateTime<Utc>) -> StatusEvent {
        if self.session.state != AccessState::Idle {
            debug!(from = %self.session.state, "session reset");
        }
        self.session = AccessSession::new(now);
        self.status_event(None, now)
    }

    fn on_idle(
        &mut self,
        snapshot: &DetectionSnapshot,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        if !self.identity_check {
            self.session.person = Some(Identity::placeholder());
            self.transition(AccessState::PpeChecking, None, now, effects);
        } else if snapshot.face_located() {
            self.transition(AccessState::FaceDetecting, None, now, effects);
        }
    }

    fn on_face_detecting(
        &mut self,
        snapshot: &DetectionSnapshot,
        elapsed: Duration,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        match snapshot.face.as_ref() {
            Some(face) if face.matched => {
                info!(
                    person_id = ?face.person_id,
                    name = ?face.name,
                    confidence = ?face.confidence,
                    "face matched"
                );
                self.session.person = Some(Identity::from_face(face));
                self.transition(AccessState::FaceRecognized, None, now, effects);
            }
            Some(face) if face.is_located() => {
                if elapsed > self.timings.face_timeout {
                    self.deny(DenialReason::UnknownPerson, false, now, effects);
                }
            }
            _ => {
                if elapsed > self.timings.face_timeout {
                    debug!("face lost, abandoning attempt");
                    effects.push(Effect::Publish(self.reset(now)));
                }
            }
        }
    }

    fn on_ppe_checking(&mut self, elapsed: Duration, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if self.identity_check && self.session.authorized_person_id().is_none() {
            self.deny(DenialReason::Unauthorized, false, now, effects);
            return;
        }

        let config = self.compliance.current();
        let identity_matched = self.identity_matched();

        if compliance::is_satisfied(&self.session.detected_labels, &config) {
            self.transition(AccessState::AccessGranted, None, now, effects);
            effects.push(Effect::Record(self.decision(
                identity_matched,
                true,
                None,
                now,
            )));
        } else if elapsed > self.timings.ppe_timeout {
            let missing = compliance::missing_labels(&self.session.detected_labels, &config);
            info!(?missing, mode = %config.mode(), "required equipment not detected");
            self.deny(DenialReason::PpeIncomplete, identity_matched, now, effects);
        }
    }

    /// Whether identity passed: a captured authorized person, or a waived check.
    fn identity_matched(&self) -> bool {
        !self.identity_check || self.session.authorized_person_id().is_some()
    }

    fn deny(
        &mut self,
        reason: DenialReason,
        identity_matched: bool,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        info!(reason = %reason, "access denied");
        self.transition(
            AccessState::AccessDenied,
            Some(reason.to_string()),
            now,
            effects,
        );
        effects.push(Effect::Record(self.decision(
            identity_matched,
            false,
            Some(reason),
            now,
        )));
    }

    fn transition(
        &mut self,
        to: AccessState,
        message: Option<String>,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        info!(from = %self.session.state, to = %to, "state transition");
        self.session.state = to;
        self.session.state_entered_at = now;
        if to == AccessState::AccessGranted {
            self.session.granted_at = Some(now);
        }
        effects.push(Effect::Publish(self.status_event(message, now)));
    }

    fn decision(
        &self,
        identity_matched: bool,
        granted: bool,
        denial_reason: Option<DenialReason>,
        now: DateTime<Utc>,
    ) -> AccessDecisionRecord {
        let person = self.session.person.as_ref();
        AccessDecisionRecord {
            id: Uuid::new_v4(),
            person_id: person.and_then(|p| p.person_id),
            person_name: self.session.person_name().unwrap_or("Unknown").to_owned(),
            employee_id: person.and_then(|p| p.employee_id.clone()),
            identity_matched,
            identity_confidence: person.and_then(|p| p.confidence),
            detected_labels: self.session.detected_labels.clone(),
            compliance_satisfied: granted,
            granted,
            denial_reason,
            decided_at: now,
        }
    }

    fn status_event(&self, message: Option<String>, now: DateTime<Utc>) -> StatusEvent {
        let state = self.session.state;
        let person = self.session.person.as_ref();
        StatusEvent {
            state,
            person_id: person.and_then(|p| p.person_id),
            person_name: person.and_then(|p| p.name.clone()),
            confidence: person.and_then(|p| p.confidence),
            detected_labels: self.session.detected_labels.clone(),
            message: message
                .unwrap_or_else(|| default_message(state, self.session.person_name())),
            grant_display_secs: (state == AccessState::AccessGranted)
                .then(|| self.timings.display_duration.as_secs()),
            at: now,
        }
    }

    fn finish(&self, effects: Vec<Effect>) -> Advance {
        Advance {
            state: self.session.state,
            effects,
        }
    }
}
