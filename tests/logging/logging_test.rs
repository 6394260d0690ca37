//! Tests for `src/logging.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::layer::SubscriberExt;

use turnstile::gate::compliance::ComplianceConfig;
use turnstile::gate::engine::{DecisionEngine, GateTimings};
use turnstile::gate::{DetectionSnapshot, ObjectResult};
use turnstile::logging::{json_layer, LoggingGuard};
use turnstile::settings::ComplianceConfigProvider;

struct NoRequirements;

impl ComplianceConfigProvider for NoRequirements {
    fn current(&self) -> ComplianceConfig {
        ComplianceConfig::default()
    }

    fn invalidate(&self) {}
}

/// Parsed JSON lines whose `fields.message` equals `message`.
fn events_named(log: &str, message: &str) -> Vec<serde_json::Value> {
    log.lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
        .filter(|event| event["fields"]["message"] == message)
        .collect()
}

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("gate").join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; a second init in the same
    // binary returns an error, but the directory is created first.
    let _result = turnstile::logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_tolerates_existing_subscriber() {
    turnstile::logging::init_cli();
    turnstile::logging::init_cli();
}

#[test]
fn json_log_carries_transition_and_denial_fields() {
    let file = tempfile::NamedTempFile::new().expect("temp file");
    let writer = Arc::new(file.reopen().expect("reopen"));
    let subscriber = tracing_subscriber::registry().with(json_layer(writer));

    tracing::subscriber::with_default(subscriber, || {
        let now = Utc::now();
        let mut engine =
            DecisionEngine::new(GateTimings::default(), Arc::new(NoRequirements), now);
        let crowd = DetectionSnapshot {
            face: None,
            objects: ObjectResult {
                detected_labels: vec!["Person".to_owned()],
                confidence: HashMap::new(),
                counts: HashMap::from([("Person".to_owned(), 2)]),
            },
        };
        let _ = engine.advance(&crowd, now);
    });

    let log = std::fs::read_to_string(file.path()).expect("read log");

    let transitions = events_named(&log, "state transition");
    let transition = transitions.first().expect("transition logged");
    assert_eq!(transition["fields"]["from"], "IDLE");
    assert_eq!(transition["fields"]["to"], "ACCESS_DENIED");

    let denials = events_named(&log, "access denied");
    let denial = denials.first().expect("denial logged");
    assert_eq!(
        denial["fields"]["reason"],
        "Multiple people detected (2). Please enter one at a time."
    );

    let overrides = events_named(&log, "multiple occupants in frame");
    assert_eq!(overrides.first().expect("override logged")["fields"]["occupants"], 2);
}
