//! Newline-delimited JSON audit sink.
//!
//! Each [`AuditEntry`] becomes one line appended to the target file. The
//! file is created on first write; parent directories must exist.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage_traits::{AuditEntry, AuditSink, StoreResult};

/// Append-only JSONL audit log.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    // Serializes appends so concurrent writers never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry in the file.
    pub async fn read_all(&self) -> StoreResult<Vec<AuditEntry>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), seq = entry.seq, "audit entry appended");
        Ok(())
    }
}
