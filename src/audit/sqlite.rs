//! SQLite audit sink.
//!
//! Records land in the `access_decisions` table, which triggers keep
//! append-only. Migration is applied inline via `include_str!` on open.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::AuditSink;
use crate::gate::{AccessDecisionRecord, DenialReason};

/// Column tuple as stored.
type DecisionRow = (
    String,
    String,
    Option<i64>,
    String,
    Option<String>,
    bool,
    Option<f64>,
    String,
    bool,
    bool,
    Option<String>,
);

/// Access decision log backed by SQLite.
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    /// Open (or create) the log at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create audit db directory {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open audit db at {}", path.display()))?;

        let migration_sql = include_str!("../../migrations/001_access_log.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply access log schema")?;

        Ok(Self { pool })
    }

    /// Most recent records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<AccessDecisionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<DecisionRow> = sqlx::query_as(
            "SELECT id, decided_at, person_id, person_name, employee_id, identity_matched,
                    identity_confidence, detected_labels, compliance_satisfied, granted,
                    denial_reason
             FROM access_decisions
             ORDER BY rowid DESC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to query access decisions")?;

        rows.into_iter().map(row_to_record).collect()
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM access_decisions")
            .fetch_one(&self.pool)
            .await
            .context("failed to count access decisions")?;
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn append(&self, record: &AccessDecisionRecord) -> anyhow::Result<()> {
        let labels = serde_json::to_string(&record.detected_labels)?;
        let reason = record
            .denial_reason
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r"INSERT INTO access_decisions (
                id, decided_at, person_id, person_name, employee_id, identity_matched,
                identity_confidence, detected_labels, compliance_satisfied, granted,
                denial_reason
              ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(record.id.to_string())
        .bind(record.decided_at.to_rfc3339())
        .bind(record.person_id)
        .bind(&record.person_name)
        .bind(record.employee_id.as_deref())
        .bind(record.identity_matched)
        .bind(record.identity_confidence)
        .bind(labels)
        .bind(record.compliance_satisfied)
        .bind(record.granted)
        .bind(reason)
        .execute(&self.pool)
        .await
        .context("failed to insert access decision")?;

        Ok(())
    }
}

fn row_to_record(row: DecisionRow) -> anyhow::Result<AccessDecisionRecord> {
    let (
        id,
        decided_at,
        person_id,
        person_name,
        employee_id,
        identity_matched,
        identity_confidence,
        detected_labels,
        compliance_satisfied,
        granted,
        denial_reason,
    ) = row;

    let denial_reason: Option<DenialReason> = denial_reason
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("malformed denial reason")?;

    Ok(AccessDecisionRecord {
        id: Uuid::parse_str(&id).with_context(|| format!("malformed record id {id}"))?,
        person_id,
        person_name,
        employee_id,
        identity_matched,
        identity_confidence,
        detected_labels: serde_json::from_str(&detected_labels)
            .context("malformed detected labels")?,
        compliance_satisfied,
        granted,
        denial_reason,
        decided_at: DateTime::parse_from_rfc3339(&decided_at)
            .with_context(|| format!("malformed decision timestamp {decided_at}"))?
            .with_timezone(&Utc),
    })
}
