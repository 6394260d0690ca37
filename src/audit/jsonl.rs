//! JSON-lines audit sink.
//!
//! One serialized [`AccessDecisionRecord`] per line, flushed after each write.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;

use super::AuditSink;
use crate::gate::AccessDecisionRecord;

/// Audit sink appending JSON lines to a file or arbitrary writer.
pub struct JsonlAuditLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlAuditLog {
    /// Append to the file at `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// Audit sink over an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn append(&self, record: &AccessDecisionRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("audit lock poisoned: {e}"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
