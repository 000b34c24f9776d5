//! # JSON Lines Audit Writer
//!
//! Appends one JSON document per replay audit event to a local file.

use crate::audit::{AuditError, AuditWriter, ReplayAuditEvent};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Append-only audit log file
#[derive(Debug)]
pub struct JsonLinesAuditWriter {
    path: PathBuf,
    /// Keeps concurrent events from interleaving within a line
    append_lock: Mutex<()>,
}

impl JsonLinesAuditWriter {
    /// Create a writer for `path`, creating its parent directory
    pub async fn new(path: PathBuf) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AuditError::StorageError {
                    message: format!("Failed to create audit directory: {}", e),
                })?;
        }

        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditWriter for JsonLinesAuditWriter {
    async fn write_event(&self, event: &ReplayAuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event).map_err(|e| AuditError::SerializationError {
            message: format!("Failed to serialize audit event: {}", e),
        })?;
        line.push(b'\n');

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::StorageError {
                message: format!("Failed to open audit log: {}", e),
            })?;

        file.write_all(&line)
            .await
            .map_err(|e| AuditError::StorageError {
                message: format!("Failed to append audit event: {}", e),
            })?;

        file.flush().await.map_err(|e| AuditError::StorageError {
            message: format!("Failed to flush audit log: {}", e),
        })
    }
}

#[cfg(test)]
#[path = "jsonl_audit_tests.rs"]
mod tests;
