//! # Filesystem Staging Store
//!
//! Local document store for staged messages and user sessions.
//!
//! Layout under the base directory:
//!
//! ```text
//! messages/<sha256(user id)>/<sha256(message id)>.json
//! sessions/<sha256(user id)>.json
//! ```
//!
//! Names are fixed-length digests so any valid id fits within filesystem
//! name limits. The real ids live inside the documents.
//!
//! Documents are written to a temporary file and renamed into place. A batch
//! is committed only when every document in it has been renamed; a failure
//! part way through removes the documents already committed by that batch.

use crate::query::{MessageQuery, SearchProperties};
use crate::sessions::{UserSession, UserSessionStore};
use crate::staging::{
    validate_create_batch, validate_delete_batch, InvestigationCount, QueueMessage, StagingStore,
    StoreError,
};
use crate::{MessageId, Timestamp, UserId, UserSessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

const MESSAGES_DIR: &str = "messages";
const SESSIONS_DIR: &str = "sessions";
const DOCUMENT_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";
const DELETING_EXTENSION: &str = "json.deleting";

/// Stored form of a staged message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedDocument {
    staged_at: Timestamp,
    /// Position within the write that staged it
    position: u32,
    message: QueueMessage,
}

/// Filesystem-backed staging and session store
///
/// # Examples
///
/// ```no_run
/// use queue_salvage_core::adapters::FilesystemStagingStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FilesystemStagingStore::new(PathBuf::from("./data/staging")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemStagingStore {
    base_path: PathBuf,
    /// Serialises mutations so batch commits and rollbacks do not interleave
    write_lock: Arc<Mutex<()>>,
}

impl FilesystemStagingStore {
    /// Create a store rooted at `base_path`, creating directories as needed
    pub async fn new(base_path: PathBuf) -> Result<Self, StoreError> {
        for dir in [MESSAGES_DIR, SESSIONS_DIR] {
            fs::create_dir_all(base_path.join(dir))
                .await
                .map_err(|e| StoreError::write("open", format!("Failed to create {}: {}", dir, e)))?;
        }

        Ok(Self {
            base_path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn partition_dir(&self, owner: &UserId) -> PathBuf {
        self.base_path
            .join(MESSAGES_DIR)
            .join(storage_name(owner.as_str()))
    }

    fn document_path(&self, owner: &UserId, id: &MessageId) -> PathBuf {
        self.partition_dir(owner)
            .join(format!("{}.{}", storage_name(id.as_str()), DOCUMENT_EXTENSION))
    }

    fn session_path(&self, user_id: &UserId) -> PathBuf {
        self.base_path.join(SESSIONS_DIR).join(format!(
            "{}.{}",
            storage_name(user_id.as_str()),
            DOCUMENT_EXTENSION
        ))
    }

    async fn load_partition(&self, owner: &UserId) -> Result<Vec<StagedDocument>, StoreError> {
        let mut documents: Vec<StagedDocument> =
            read_documents(&self.partition_dir(owner)).await?;

        documents.sort_by(|a, b| {
            a.staged_at
                .cmp(&b.staged_at)
                .then(a.position.cmp(&b.position))
                .then_with(|| a.message.id.cmp(&b.message.id))
        });
        Ok(documents)
    }

    async fn load_messages(&self, owner: &UserId) -> Result<Vec<QueueMessage>, StoreError> {
        Ok(self
            .load_partition(owner)
            .await?
            .into_iter()
            .map(|d| d.message)
            .collect())
    }

    /// Write and commit documents for one batch, undoing the batch on failure
    async fn commit_batch(
        &self,
        operation: &str,
        owner: &UserId,
        messages: &[QueueMessage],
    ) -> Result<(), StoreError> {
        let partition = self.partition_dir(owner);
        fs::create_dir_all(&partition).await.map_err(|e| {
            StoreError::write(operation, format!("Failed to create partition: {}", e))
        })?;

        for message in messages {
            let path = self.document_path(owner, &message.id);
            if path_exists(&path).await? {
                return Err(StoreError::write(
                    operation,
                    format!("message '{}' is already staged for '{}'", message.id, owner),
                ));
            }
        }

        let staged_at = Timestamp::now();
        let mut pending: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(messages.len());
        for (position, message) in messages.iter().enumerate() {
            let document = StagedDocument {
                staged_at,
                position: position as u32,
                message: message.clone(),
            };
            let target = self.document_path(owner, &message.id);

            let written = match serde_json::to_vec_pretty(&document) {
                Ok(bytes) => write_temp(&target, &bytes).await.map_err(|e| {
                    StoreError::write(operation, format!("Failed to write document: {}", e))
                }),
                Err(e) => Err(StoreError::Serialization {
                    message: format!("Failed to serialize message '{}': {}", message.id, e),
                }),
            };

            match written {
                Ok(temp) => pending.push((temp, target)),
                Err(e) => {
                    remove_all(pending.iter().map(|(temp, _)| temp)).await;
                    return Err(e);
                }
            }
        }

        let mut committed: Vec<PathBuf> = Vec::with_capacity(pending.len());
        for (index, (temp, target)) in pending.iter().enumerate() {
            if let Err(e) = fs::rename(temp, target).await {
                remove_all(committed.iter()).await;
                remove_all(pending[index..].iter().map(|(temp, _)| temp)).await;
                return Err(StoreError::write(
                    operation,
                    format!("Failed to commit document: {}", e),
                ));
            }
            committed.push(target.clone());
        }

        Ok(())
    }
}

// ============================================================================
// File Helpers
// ============================================================================

/// Fixed-length file or directory name for an id
fn storage_name(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

async fn path_exists(path: &Path) -> Result<bool, StoreError> {
    fs::try_exists(path).await.map_err(|e| StoreError::ReadFailed {
        message: format!("Failed to check {}: {}", path.display(), e),
    })
}

/// Write `bytes` next to `target` and return the temporary path
async fn write_temp(target: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let temp_path = target.with_extension(TEMP_EXTENSION);
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(temp_path)
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = write_temp(target, bytes).await?;
    fs::rename(&temp_path, target).await
}

async fn remove_all<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove document during rollback");
            }
        }
    }
}

async fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let json = match fs::read(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::ReadFailed {
                message: format!("Failed to read {}: {}", path.display(), e),
            })
        }
    };

    serde_json::from_slice(&json)
        .map(Some)
        .map_err(|e| StoreError::Serialization {
            message: format!("Failed to deserialize {}: {}", path.display(), e),
        })
}

/// Every committed document in `dir`; a missing directory is empty
async fn read_documents<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let read_failed = |e: io::Error| StoreError::ReadFailed {
        message: format!("Failed to list {}: {}", dir.display(), e),
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_failed(e)),
    };

    let mut documents = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
            continue;
        }
        // Deleted between listing and reading
        if let Some(document) = read_document(&path).await? {
            documents.push(document);
        }
    }

    Ok(documents)
}

// ============================================================================
// Staging Store
// ============================================================================

#[async_trait]
impl StagingStore for FilesystemStagingStore {
    async fn create_one(&self, message: &QueueMessage) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.commit_batch("create_one", &message.user_id, std::slice::from_ref(message))
            .await
    }

    async fn create_batch(
        &self,
        owner: &UserId,
        messages: &[QueueMessage],
    ) -> Result<(), StoreError> {
        validate_create_batch(owner, messages)?;
        if messages.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        self.commit_batch("create_batch", owner, messages).await
    }

    async fn delete_batch(&self, owner: &UserId, ids: &[MessageId]) -> Result<(), StoreError> {
        validate_delete_batch(ids)?;
        let _guard = self.write_lock.lock().await;

        let unique: HashSet<&MessageId> = ids.iter().collect();
        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(unique.len());

        for id in unique {
            let path = self.document_path(owner, id);
            let parked = path.with_extension(DELETING_EXTENSION);

            match fs::rename(&path, &parked).await {
                Ok(()) => moved.push((path, parked)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    for (original, parked) in &moved {
                        if let Err(restore) = fs::rename(parked, original).await {
                            warn!(
                                path = %original.display(),
                                error = %restore,
                                "Failed to restore document after aborted delete"
                            );
                        }
                    }
                    return Err(StoreError::write(
                        "delete_batch",
                        format!("Failed to delete message '{}': {}", id, e),
                    ));
                }
            }
        }

        remove_all(moved.iter().map(|(_, parked)| parked)).await;
        Ok(())
    }

    async fn query(
        &self,
        owner: &UserId,
        search: &SearchProperties,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let query = MessageQuery::from_search(owner.clone(), search)?;
        Ok(query.execute(self.load_messages(owner).await?))
    }

    async fn count(
        &self,
        owner: &UserId,
        search: Option<&SearchProperties>,
    ) -> Result<u64, StoreError> {
        let query = MessageQuery::for_count(owner.clone(), search);
        let messages = self.load_messages(owner).await?;
        Ok(query.count(messages.iter()))
    }

    async fn query_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            let path = self.document_path(owner, id);
            if let Some(document) = read_document::<StagedDocument>(&path).await? {
                if document.message.id == *id {
                    found.push(document.message);
                }
            }
        }

        Ok(found)
    }

    async fn count_by_queue(&self) -> Result<Vec<InvestigationCount>, StoreError> {
        let root = self.base_path.join(MESSAGES_DIR);
        let read_failed = |e: io::Error| StoreError::ReadFailed {
            message: format!("Failed to list {}: {}", root.display(), e),
        };

        let mut counts: BTreeMap<(String, UserId), u64> = BTreeMap::new();
        let mut partitions = fs::read_dir(&root).await.map_err(read_failed)?;
        while let Some(entry) = partitions.next_entry().await.map_err(read_failed)? {
            if !entry.file_type().await.map_err(read_failed)?.is_dir() {
                continue;
            }

            let documents: Vec<StagedDocument> = read_documents(&entry.path()).await?;
            for document in documents {
                *counts
                    .entry((document.message.queue.to_string(), document.message.user_id))
                    .or_default() += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|((queue, user_id), message_count)| InvestigationCount {
                queue,
                user_id,
                message_count,
            })
            .collect())
    }
}

// ============================================================================
// Session Store
// ============================================================================

#[async_trait]
impl UserSessionStore for FilesystemStagingStore {
    async fn upsert_session(&self, session: &UserSession) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| StoreError::Serialization {
            message: format!("Failed to serialize session: {}", e),
        })?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.session_path(&session.user_id), &bytes)
            .await
            .map_err(|e| StoreError::write("upsert_session", e.to_string()))
    }

    async fn get_session(&self, user_id: &UserId) -> Result<Option<UserSession>, StoreError> {
        read_document(&self.session_path(user_id)).await
    }

    async fn delete_session(
        &self,
        user_id: &UserId,
        session_id: &UserSessionId,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(user_id);

        let Some(current) = read_document::<UserSession>(&path).await? else {
            return Ok(false);
        };
        if current.id != *session_id {
            return Ok(false);
        }

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::write("delete_session", e.to_string())),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<UserSession>, StoreError> {
        let mut sessions: Vec<UserSession> =
            read_documents(&self.base_path.join(SESSIONS_DIR)).await?;
        sessions.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(sessions)
    }
}

#[cfg(test)]
#[path = "filesystem_store_tests.rs"]
mod tests;
