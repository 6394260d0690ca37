//! Audit logger: one immutable record per terminal access decision.
//!
//! Sinks are append-only. A failed append is the caller's to log; it never
//! rolls back the decision that produced the record.

pub mod jsonl;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::gate::AccessDecisionRecord;

/// Append-only destination for decision records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be written.
    async fn append(&self, record: &AccessDecisionRecord) -> anyhow::Result<()>;
}

/// Writes every record to each inner sink.
///
/// All sinks are attempted even when one fails; the first error is returned.
pub struct FanoutAudit {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAudit {
    /// Fan out to `sinks` in order.
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAudit {
    async fn append(&self, record: &AccessDecisionRecord) -> anyhow::Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(record).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
