//! Tests for `src/audit/jsonl.rs`.

use turnstile::audit::jsonl::JsonlAuditLog;
use turnstile::audit::AuditSink;
use turnstile::gate::AccessDecisionRecord;

use crate::denial;

#[tokio::test]
async fn appends_one_line_per_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit").join("decisions.jsonl");
    let log = JsonlAuditLog::open(&path).expect("open");

    let first = denial("Mary Jackson", 1);
    let second = denial("Dorothy Vaughan", 2);
    log.append(&first).await.expect("append first");
    log.append(&second).await.expect("append second");

    let contents = std::fs::read_to_string(&path).expect("read back");
    let parsed: Vec<AccessDecisionRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect();
    assert_eq!(parsed, vec![first, second]);
}

#[tokio::test]
async fn reopen_appends_instead_of_truncating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("decisions.jsonl");

    JsonlAuditLog::open(&path)
        .expect("open")
        .append(&denial("one", 1))
        .await
        .expect("append");
    JsonlAuditLog::open(&path)
        .expect("reopen")
        .append(&denial("two", 2))
        .await
        .expect("append");

    let contents = std::fs::read_to_string(&path).expect("read back");
    assert_eq!(contents.lines().count(), 2);
}

#[tokio::test]
async fn denial_reason_is_tagged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("decisions.jsonl");
    let log = JsonlAuditLog::open(&path).expect("open");
    log.append(&denial("tagged", 1)).await.expect("append");

    let contents = std::fs::read_to_string(&path).expect("read back");
    let value: serde_json::Value = serde_json::from_str(contents.trim()).expect("json");
    assert_eq!(value["denial_reason"], "ppe_incomplete");
    assert_eq!(value["granted"], false);
}
