//! # Expired Session Sweep
//!
//! Reclaims sessions whose operator has gone idle. For every expired session
//! the sweep repeatedly reads one page of the user's staged messages and
//! aborts each message back to the error queue it was staged from. The
//! session record is deleted only once a read comes back empty, so a session
//! never disappears while messages are still staged under it.
//!
//! A session that cannot be drained in the current pass (a failed read, an
//! abort that resolved nothing, or the page limit) is left for the next pass.

use crate::message_service::MessageService;
use crate::query::SearchProperties;
use crate::sessions::{UserSession, UserSessionService};
use crate::staging::{StagingStore, StoreError};
use crate::{Timestamp, UserId, UserSessionId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Tuning for a sweep pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    /// Staged messages read and aborted per iteration
    pub page_size: usize,
    /// Upper bound on iterations spent on one session within a pass
    pub max_pages_per_session: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages_per_session: 50,
        }
    }
}

/// A session left in place by a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSession {
    pub user_id: UserId,
    pub session_id: UserSessionId,
    pub reason: String,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sessions_examined: usize,
    pub sessions_deleted: usize,
    pub messages_aborted: usize,
    pub skipped: Vec<SkippedSession>,
}

/// Drains and removes expired user sessions
pub struct SessionSweep {
    sessions: UserSessionService,
    store: Arc<dyn StagingStore>,
    messages: Arc<MessageService>,
    settings: SweepSettings,
}

impl SessionSweep {
    pub fn new(
        sessions: UserSessionService,
        store: Arc<dyn StagingStore>,
        messages: Arc<MessageService>,
        settings: SweepSettings,
    ) -> Self {
        let settings = SweepSettings {
            page_size: settings.page_size.max(1),
            max_pages_per_session: settings.max_pages_per_session.max(1),
        };

        Self {
            sessions,
            store,
            messages,
            settings,
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run one pass against the current time
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        self.run_at(Timestamp::now()).await
    }

    /// Run one pass treating `now` as the current time
    ///
    /// Fails only when the expired sessions cannot be listed; per-session
    /// failures are recorded in the report.
    #[instrument(skip(self))]
    pub async fn run_at(&self, now: Timestamp) -> Result<SweepReport, StoreError> {
        let expired = self.sessions.expired_sessions(now).await?;
        let mut report = SweepReport {
            sessions_examined: expired.len(),
            ..Default::default()
        };

        for session in expired {
            match self.drain_session(&session, &mut report).await {
                Ok(()) => {}
                Err(reason) => {
                    warn!(
                        user_id = %session.user_id,
                        session_id = %session.id,
                        reason = %reason,
                        "Session not reclaimed; will retry next pass"
                    );
                    report.skipped.push(SkippedSession {
                        user_id: session.user_id.clone(),
                        session_id: session.id,
                        reason,
                    });
                }
            }
        }

        info!(
            examined = report.sessions_examined,
            deleted = report.sessions_deleted,
            aborted = report.messages_aborted,
            skipped = report.skipped.len(),
            "Session sweep finished"
        );
        Ok(report)
    }

    async fn drain_session(
        &self,
        session: &UserSession,
        report: &mut SweepReport,
    ) -> Result<(), String> {
        let page = SearchProperties::page(0, self.settings.page_size);

        for _ in 0..self.settings.max_pages_per_session {
            let staged = self
                .store
                .query(&session.user_id, &page)
                .await
                .map_err(|e| format!("reading staged messages failed: {}", e))?;

            if staged.is_empty() {
                let deleted = self
                    .sessions
                    .store()
                    .delete_session(&session.user_id, &session.id)
                    .await
                    .map_err(|e| format!("deleting session failed: {}", e))?;

                if deleted {
                    report.sessions_deleted += 1;
                    info!(
                        user_id = %session.user_id,
                        session_id = %session.id,
                        "Expired session deleted"
                    );
                } else {
                    debug!(
                        user_id = %session.user_id,
                        session_id = %session.id,
                        "Session already replaced or removed"
                    );
                }
                return Ok(());
            }

            let outcome = self.messages.abort_to_source_queues(staged).await;
            report.messages_aborted += outcome.resolved;

            if outcome.resolved == 0 {
                if let Some(failure) = outcome.failures.first() {
                    error!(
                        user_id = %session.user_id,
                        failure = %failure,
                        "Abort made no progress"
                    );
                }
                return Err("abort resolved no messages".to_string());
            }
        }

        Err(format!(
            "page limit of {} reached",
            self.settings.max_pages_per_session
        ))
    }
}

#[cfg(test)]
#[path = "sweep_tests.rs"]
mod tests;
