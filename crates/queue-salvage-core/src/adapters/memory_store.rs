//! # In-Memory Staging Store
//!
//! Thread-safe in-memory implementation for testing and development.
//! Native order is insertion order.

use crate::query::{MessageQuery, SearchProperties};
use crate::sessions::{UserSession, UserSessionStore};
use crate::staging::{
    validate_create_batch, validate_delete_batch, InvestigationCount, QueueMessage, StagingStore,
    StoreError,
};
use crate::{MessageId, UserId, UserSessionId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory staging and session store
///
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStagingStore {
    messages: Arc<RwLock<Vec<QueueMessage>>>,
    sessions: Arc<RwLock<HashMap<UserId, UserSession>>>,
}

impl InMemoryStagingStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read_messages(&self) -> Result<RwLockReadGuard<'_, Vec<QueueMessage>>, StoreError> {
        self.messages.read().map_err(|_| StoreError::ReadFailed {
            message: "message store lock poisoned".to_string(),
        })
    }

    fn write_messages(
        &self,
        operation: &str,
    ) -> Result<RwLockWriteGuard<'_, Vec<QueueMessage>>, StoreError> {
        self.messages
            .write()
            .map_err(|_| StoreError::write(operation, "message store lock poisoned"))
    }

    fn read_sessions(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<UserId, UserSession>>, StoreError> {
        self.sessions.read().map_err(|_| StoreError::ReadFailed {
            message: "session store lock poisoned".to_string(),
        })
    }

    fn write_sessions(
        &self,
        operation: &str,
    ) -> Result<RwLockWriteGuard<'_, HashMap<UserId, UserSession>>, StoreError> {
        self.sessions
            .write()
            .map_err(|_| StoreError::write(operation, "session store lock poisoned"))
    }
}

fn already_staged(operation: &str, message: &QueueMessage) -> StoreError {
    StoreError::write(
        operation,
        format!(
            "message '{}' is already staged for '{}'",
            message.id, message.user_id
        ),
    )
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn create_one(&self, message: &QueueMessage) -> Result<(), StoreError> {
        let mut messages = self.write_messages("create_one")?;

        if messages
            .iter()
            .any(|m| m.user_id == message.user_id && m.id == message.id)
        {
            return Err(already_staged("create_one", message));
        }

        messages.push(message.clone());
        Ok(())
    }

    async fn create_batch(
        &self,
        owner: &UserId,
        batch: &[QueueMessage],
    ) -> Result<(), StoreError> {
        validate_create_batch(owner, batch)?;
        let mut messages = self.write_messages("create_batch")?;

        let existing: HashSet<&MessageId> = messages
            .iter()
            .filter(|m| m.user_id == *owner)
            .map(|m| &m.id)
            .collect();
        if let Some(conflict) = batch.iter().find(|m| existing.contains(&m.id)) {
            return Err(already_staged("create_batch", conflict));
        }

        messages.extend(batch.iter().cloned());
        Ok(())
    }

    async fn delete_batch(&self, owner: &UserId, ids: &[MessageId]) -> Result<(), StoreError> {
        validate_delete_batch(ids)?;
        let doomed: HashSet<&MessageId> = ids.iter().collect();

        let mut messages = self.write_messages("delete_batch")?;
        messages.retain(|m| !(m.user_id == *owner && doomed.contains(&m.id)));
        Ok(())
    }

    async fn query(
        &self,
        owner: &UserId,
        search: &SearchProperties,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let query = MessageQuery::from_search(owner.clone(), search)?;
        let messages = self.read_messages()?;
        Ok(query.execute(messages.iter().cloned()))
    }

    async fn count(
        &self,
        owner: &UserId,
        search: Option<&SearchProperties>,
    ) -> Result<u64, StoreError> {
        let query = MessageQuery::for_count(owner.clone(), search);
        let messages = self.read_messages()?;
        Ok(query.count(messages.iter()))
    }

    async fn query_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let messages = self.read_messages()?;

        Ok(messages
            .iter()
            .filter(|m| m.user_id == *owner && wanted.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn count_by_queue(&self) -> Result<Vec<InvestigationCount>, StoreError> {
        let messages = self.read_messages()?;

        let mut counts: BTreeMap<(String, UserId), u64> = BTreeMap::new();
        for message in messages.iter() {
            *counts
                .entry((message.queue.to_string(), message.user_id.clone()))
                .or_default() += 1;
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

#[async_trait]
impl UserSessionStore for InMemoryStagingStore {
    async fn upsert_session(&self, session: &UserSession) -> Result<(), StoreError> {
        let mut sessions = self.write_sessions("upsert_session")?;
        sessions.insert(session.user_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, user_id: &UserId) -> Result<Option<UserSession>, StoreError> {
        let sessions = self.read_sessions()?;
        Ok(sessions.get(user_id).cloned())
    }

    async fn delete_session(
        &self,
        user_id: &UserId,
        session_id: &UserSessionId,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.write_sessions("delete_session")?;

        match sessions.get(user_id) {
            Some(current) if current.id == *session_id => {
                sessions.remove(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<UserSession>, StoreError> {
        let sessions = self.read_sessions()?;
        let mut listed: Vec<UserSession> = sessions.values().cloned().collect();
        listed.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(listed)
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
