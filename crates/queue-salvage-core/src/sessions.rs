//! Operator sessions.
//!
//! A session records which error queue an operator is investigating and when
//! they last interacted with it. There is at most one session per user.
//! Sessions idle for longer than the configured expiry are drained and removed
//! by the sweep.

use crate::staging::StoreError;
use crate::{QueueName, Timestamp, UserId, UserSessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Core Types
// ============================================================================

/// One operator's active investigation of an error queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub id: UserSessionId,
    pub user_id: UserId,
    pub queue: QueueName,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl UserSession {
    /// New session starting now
    pub fn new(user_id: UserId, queue: QueueName) -> Self {
        let now = Timestamp::now();
        Self {
            id: UserSessionId::new(),
            user_id,
            queue,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// True once more than `expiry` has passed since the last activity
    pub fn is_expired(&self, now: Timestamp, expiry: chrono::Duration) -> bool {
        now.duration_since(&self.last_activity_at) > expiry
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// Persistence for user sessions, keyed by user
#[async_trait]
pub trait UserSessionStore: Send + Sync {
    /// Insert or replace the user's session
    async fn upsert_session(&self, session: &UserSession) -> Result<(), StoreError>;

    /// The user's session, if any
    async fn get_session(&self, user_id: &UserId) -> Result<Option<UserSession>, StoreError>;

    /// Delete the user's session if it is still the one identified by `session_id`
    ///
    /// Returns whether a session was removed.
    async fn delete_session(
        &self,
        user_id: &UserId,
        session_id: &UserSessionId,
    ) -> Result<bool, StoreError>;

    /// Every stored session
    async fn list_sessions(&self) -> Result<Vec<UserSession>, StoreError>;

    /// Sessions whose last activity is before `cutoff`
    async fn sessions_inactive_since(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<UserSession>, StoreError> {
        Ok(self
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.last_activity_at < cutoff)
            .collect())
    }

    /// Refresh the last activity of the user's session
    async fn touch_session(
        &self,
        user_id: &UserId,
        at: Timestamp,
    ) -> Result<Option<UserSession>, StoreError> {
        let Some(mut session) = self.get_session(user_id).await? else {
            return Ok(None);
        };

        session.last_activity_at = at;
        self.upsert_session(&session).await?;
        Ok(Some(session))
    }
}

// ============================================================================
// Service
// ============================================================================

/// Session lifecycle operations used by the operator surfaces
#[derive(Clone)]
pub struct UserSessionService {
    store: Arc<dyn UserSessionStore>,
    expiry: chrono::Duration,
}

impl UserSessionService {
    pub fn new(store: Arc<dyn UserSessionStore>, expiry: chrono::Duration) -> Self {
        Self { store, expiry }
    }

    /// Inactivity period after which a session expires
    pub fn expiry(&self) -> chrono::Duration {
        self.expiry
    }

    pub fn store(&self) -> &Arc<dyn UserSessionStore> {
        &self.store
    }

    /// Open a session on `queue`, or refresh the existing one if it is for the same queue
    pub async fn create_user_session(
        &self,
        user_id: &UserId,
        queue: &QueueName,
    ) -> Result<UserSession, StoreError> {
        if let Some(existing) = self.store.get_session(user_id).await? {
            if existing.queue == *queue {
                debug!(user_id = %user_id, queue = %queue, "Refreshing existing session");
                return Ok(self
                    .store
                    .touch_session(user_id, Timestamp::now())
                    .await?
                    .unwrap_or(existing));
            }
        }

        let session = UserSession::new(user_id.clone(), queue.clone());
        self.store.upsert_session(&session).await?;
        info!(
            user_id = %user_id,
            queue = %queue,
            session_id = %session.id,
            "User session created"
        );
        Ok(session)
    }

    pub async fn get_user_session(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserSession>, StoreError> {
        self.store.get_session(user_id).await
    }

    /// Remove the user's current session; returns whether one existed
    pub async fn delete_user_session(&self, user_id: &UserId) -> Result<bool, StoreError> {
        let Some(session) = self.store.get_session(user_id).await? else {
            return Ok(false);
        };

        let deleted = self.store.delete_session(user_id, &session.id).await?;
        if deleted {
            info!(user_id = %user_id, session_id = %session.id, "User session deleted");
        }
        Ok(deleted)
    }

    /// Mark the user as active now
    pub async fn record_activity(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserSession>, StoreError> {
        self.store.touch_session(user_id, Timestamp::now()).await
    }

    /// Sessions that have been idle longer than the expiry, as of `now`
    pub async fn expired_sessions(&self, now: Timestamp) -> Result<Vec<UserSession>, StoreError> {
        self.store
            .sessions_inactive_since(now.subtract_duration(self.expiry))
            .await
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
