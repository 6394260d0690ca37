//! CLI contract tests.

use std::path::Path;

use assert_cmd::Command;

use turnstile::audit::sqlite::SqliteAuditLog;
use turnstile::audit::AuditSink;
use turnstile::gate::{AccessDecisionRecord, DenialReason};

/// Binary with `HOME` pointed at a scratch directory.
fn turnstile(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_turnstile"));
    cmd.env("HOME", home)
        .env_remove("TURNSTILE_CONFIG_PATH")
        .env_remove("TURNSTILE_AUDIT_DB")
        .env_remove("TURNSTILE_REPLAY_PATH")
        .env_remove("TURNSTILE_SETTINGS_PATH")
        .env_remove("TURNSTILE_LOG_DIR");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf-8 stdout")
}

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().expect("tempdir");
    let help = stdout_of(turnstile(home.path()).arg("--help"));
    assert!(help.contains("run"));
    assert!(help.contains("check-config"));
    assert!(help.contains("decisions"));
}

#[test]
fn check_config_prints_effective_values() {
    let home = tempfile::tempdir().expect("tempdir");
    let config_path = home.path().join("turnstile.toml");
    std::fs::write(&config_path, "[gate]\nppe_timeout_secs = 7\n").expect("write config");

    let settings_dir = home.path().join(".turnstile");
    std::fs::create_dir_all(&settings_dir).expect("data dir");
    std::fs::write(
        settings_dir.join("settings.toml"),
        "identity_check_enabled = false\n[compliance]\nrequired = [\"Hardhat\"]\n",
    )
    .expect("write settings");

    let out = stdout_of(
        turnstile(home.path())
            .arg("check-config")
            .arg("--config")
            .arg(&config_path),
    );
    let report: serde_json::Value = serde_json::from_str(&out).expect("json report");
    assert_eq!(report["config"]["gate"]["ppe_timeout_secs"], 7);
    assert_eq!(report["config"]["gate"]["face_timeout_secs"], 5);
    assert_eq!(report["settings"]["identity_check_enabled"], false);
    assert_eq!(report["settings"]["compliance"]["required"][0], "Hardhat");
}

#[test]
fn check_config_rejects_malformed_settings() {
    let home = tempfile::tempdir().expect("tempdir");
    let settings_dir = home.path().join(".turnstile");
    std::fs::create_dir_all(&settings_dir).expect("data dir");
    std::fs::write(settings_dir.join("settings.toml"), "[compliance\n").expect("write settings");

    turnstile(home.path())
        .arg("check-config")
        .arg("--config")
        .arg(home.path().join("absent.toml"))
        .assert()
        .failure();
}

#[test]
fn run_without_replay_script_fails() {
    let home = tempfile::tempdir().expect("tempdir");
    let assert = turnstile(home.path())
        .arg("run")
        .arg("--config")
        .arg(home.path().join("absent.toml"))
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("no replay script configured"), "stderr: {stderr}");
}

#[tokio::test]
async fn decisions_lists_newest_first() {
    let home = tempfile::tempdir().expect("tempdir");
    let db_path = home.path().join("gate.db");
    let config_path = home.path().join("turnstile.toml");
    std::fs::write(
        &config_path,
        format!("[audit]\nsqlite_path = {:?}\n", db_path.display().to_string()),
    )
    .expect("write config");

    let log = SqliteAuditLog::open(&db_path).await.expect("open audit log");
    for name in ["early", "late"] {
        let record = AccessDecisionRecord {
            id: uuid::Uuid::new_v4(),
            person_id: None,
            person_name: name.to_owned(),
            employee_id: None,
            identity_matched: false,
            identity_confidence: None,
            detected_labels: Vec::new(),
            compliance_satisfied: false,
            granted: false,
            denial_reason: Some(DenialReason::UnknownPerson),
            decided_at: chrono::Utc::now(),
        };
        log.append(&record).await.expect("append");
    }

    let out = stdout_of(
        turnstile(home.path())
            .arg("decisions")
            .arg("--config")
            .arg(&config_path)
            .arg("--limit")
            .arg("1"),
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: AccessDecisionRecord =
        serde_json::from_str(lines.first().expect("one line")).expect("record json");
    assert_eq!(record.person_name, "late");
}
