//! Staged message model and the staging store contract.
//!
//! The staging store holds working copies of failed messages, partitioned by
//! the operator who staged them. Batch writes are all-or-nothing per call.

use crate::query::{QueryError, SearchProperties};
use crate::{Message, MessageId, QueueName, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest number of operations a single batch call accepts
pub const MAX_BATCH_OPERATIONS: usize = 100;

// ============================================================================
// Core Types
// ============================================================================

/// A failed message staged for triage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: MessageId,
    /// Partition key
    pub user_id: UserId,
    /// Error queue the message was read from
    pub queue: QueueName,
    pub processing_endpoint: String,
    pub originating_endpoint: String,
    pub body: String,
    pub exception: String,
    pub exception_type: String,
    /// Broker-native payload used to re-send the message unchanged
    pub original_message: Message,
    /// Inspection copy that must never be sent
    pub is_read_only: bool,
}

impl QueueMessage {
    /// The text fields free-text search looks at
    pub fn searchable_fields(&self) -> [&str; 5] {
        [
            &self.body,
            &self.processing_endpoint,
            &self.originating_endpoint,
            &self.exception,
            &self.exception_type,
        ]
    }
}

/// Number of messages one user has staged from one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationCount {
    pub queue: String,
    pub user_id: UserId,
    pub message_count: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by staging and session stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store write failed during {operation}: {message}")]
    WriteFailed { operation: String, message: String },

    #[error("Store read failed: {message}")]
    ReadFailed { message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Document serialization failed: {message}")]
    Serialization { message: String },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WriteFailed { .. } => true,
            Self::ReadFailed { .. } => true,
            Self::InvalidQuery(_) => false,
            Self::Serialization { .. } => false,
        }
    }

    pub(crate) fn write(operation: &str, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// Check a create batch against the partition and size rules shared by every store
pub(crate) fn validate_create_batch(
    owner: &UserId,
    messages: &[QueueMessage],
) -> Result<(), StoreError> {
    if messages.len() > MAX_BATCH_OPERATIONS {
        return Err(StoreError::write(
            "create_batch",
            format!(
                "batch of {} exceeds the limit of {} operations",
                messages.len(),
                MAX_BATCH_OPERATIONS
            ),
        ));
    }

    let mut seen = HashSet::new();
    for message in messages {
        if message.user_id != *owner {
            return Err(StoreError::write(
                "create_batch",
                format!(
                    "message '{}' belongs to partition '{}', not '{}'",
                    message.id, message.user_id, owner
                ),
            ));
        }
        if !seen.insert(&message.id) {
            return Err(StoreError::write(
                "create_batch",
                format!("message '{}' appears twice in the batch", message.id),
            ));
        }
    }

    Ok(())
}

/// Check a delete batch against the size rule
pub(crate) fn validate_delete_batch(ids: &[MessageId]) -> Result<(), StoreError> {
    if ids.len() > MAX_BATCH_OPERATIONS {
        return Err(StoreError::write(
            "delete_batch",
            format!(
                "batch of {} exceeds the limit of {} operations",
                ids.len(),
                MAX_BATCH_OPERATIONS
            ),
        ));
    }
    Ok(())
}

// ============================================================================
// Store Contract
// ============================================================================

/// Per-user partitioned store of staged messages
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Insert a single message into its owner's partition
    async fn create_one(&self, message: &QueueMessage) -> Result<(), StoreError>;

    /// Insert a batch into `owner`'s partition; nothing is kept if any item fails
    async fn create_batch(
        &self,
        owner: &UserId,
        messages: &[QueueMessage],
    ) -> Result<(), StoreError>;

    /// Delete a batch of ids from `owner`'s partition; ids that are not staged are ignored
    async fn delete_batch(&self, owner: &UserId, ids: &[MessageId]) -> Result<(), StoreError>;

    /// Filtered, ordered, paged read of `owner`'s partition
    async fn query(
        &self,
        owner: &UserId,
        search: &SearchProperties,
    ) -> Result<Vec<QueueMessage>, StoreError>;

    /// Count of `owner`'s messages matching the search text; ordering and paging are ignored
    async fn count(
        &self,
        owner: &UserId,
        search: Option<&SearchProperties>,
    ) -> Result<u64, StoreError>;

    /// Exact-id fetch; unknown ids are skipped
    async fn query_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
    ) -> Result<Vec<QueueMessage>, StoreError>;

    /// Staged message counts grouped by queue and user, across all partitions
    async fn count_by_queue(&self) -> Result<Vec<InvestigationCount>, StoreError>;

    /// Fetch a single staged message
    async fn get_message(
        &self,
        owner: &UserId,
        id: &MessageId,
    ) -> Result<Option<QueueMessage>, StoreError> {
        let mut found = self.query_by_ids(owner, std::slice::from_ref(id)).await?;
        Ok(found.pop())
    }

    /// True when the user has anything staged
    async fn has_active_session(&self, owner: &UserId) -> Result<bool, StoreError> {
        Ok(self.count(owner, None).await? > 0)
    }
}

#[cfg(test)]
#[path = "staging_tests.rs"]
mod tests;
