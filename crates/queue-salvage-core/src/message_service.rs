//! # Replay and Abort Orchestration
//!
//! Moving a staged message out of staging is a two-step saga with no shared
//! transaction: the message is sent to its destination queue first and only
//! then deleted from the staging store. A failure between the steps can
//! deliver a message twice but never loses one.
//!
//! Messages are processed in fixed-size batches, strictly one after another.
//! Within a batch every send precedes every delete, and replay audit events
//! are written only after both steps succeeded for the whole batch. A failed
//! batch is recorded in the [`BatchReport`] and processing moves on to the
//! next batch.
//!
//! A user investigates one error queue at a time. Staging from a different
//! queue is refused while anything from the current one is still staged, and
//! a session cannot be ended until its messages are resolved.

use crate::audit::{AuditActor, AuditWriter, ReplayAuditEvent};
use crate::batching;
use crate::broker::{BrokerClient, QueueNameRules};
use crate::query::SearchProperties;
use crate::sessions::UserSessionService;
use crate::staging::{QueueMessage, StagingStore, StoreError, MAX_BATCH_OPERATIONS};
use crate::{MessageId, QueueName, SalvageError, UserId, UserSessionId};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Reports
// ============================================================================

/// Step of the batch protocol that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    /// No destination queue could be derived for the message
    Route,
    Send,
    Delete,
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route => write!(f, "route"),
            Self::Send => write!(f, "send"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A batch that was not resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub message_ids: Vec<MessageId>,
    pub stage: BatchStage,
    pub reason: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} message(s): {}",
            self.stage,
            self.message_ids.len(),
            self.reason
        )
    }
}

/// Outcome of a replay, abort or discard
///
/// `attempted` counts messages handed to the operation and `resolved` counts
/// messages confirmed sent (where applicable) and removed from staging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failures: Vec<BatchFailure>,
    /// Replayed messages whose audit event could not be written
    pub audit_failures: usize,
}

impl BatchReport {
    /// Messages that were not resolved
    pub fn unresolved(&self) -> usize {
        self.attempted.saturating_sub(self.resolved)
    }

    /// True when every batch succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: BatchReport) {
        self.attempted += other.attempted;
        self.resolved += other.resolved;
        self.failures.extend(other.failures);
        self.audit_failures += other.audit_failures;
    }
}

/// Outcome of moving messages from an error queue into staging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub queue: QueueName,
    pub session_id: UserSessionId,
    /// Messages removed from the broker
    pub received: usize,
    /// Messages written to the staging store
    pub staged: usize,
    /// Messages dropped because a copy was already staged
    pub already_staged: Vec<MessageId>,
    /// Messages sent back to the source queue after a failed store write
    pub returned_to_queue: usize,
    /// Messages neither staged nor returned
    pub lost: Vec<MessageId>,
}

/// Resolved count and audit failures of one successful batch
struct BatchOutcome {
    resolved: usize,
    audit_failures: usize,
}

/// A staging write that failed, with the messages it was carrying
struct FailedWrite {
    messages: Vec<QueueMessage>,
    error: StoreError,
}

impl fmt::Display for FailedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "staging {} message(s) failed: {}", self.messages.len(), self.error)
    }
}

// ============================================================================
// Service
// ============================================================================

/// Replay, abort and staging orchestration across broker, store and audit
pub struct MessageService {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn StagingStore>,
    sessions: UserSessionService,
    audit: Arc<dyn AuditWriter>,
    rules: QueueNameRules,
    batch_size: usize,
}

impl MessageService {
    /// Create the service; `batch_size` is capped at the store's batch limit
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn StagingStore>,
        sessions: UserSessionService,
        audit: Arc<dyn AuditWriter>,
        rules: QueueNameRules,
        batch_size: usize,
    ) -> Self {
        Self {
            broker,
            store,
            sessions,
            audit,
            rules,
            batch_size: batch_size.clamp(1, MAX_BATCH_OPERATIONS),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Send each message to `destination`, remove it from staging and audit the replay
    #[instrument(
        skip(self, messages, destination, actor),
        fields(count = messages.len(), destination = %destination)
    )]
    pub async fn replay_messages(
        &self,
        messages: Vec<QueueMessage>,
        destination: &QueueName,
        actor: &AuditActor,
    ) -> BatchReport {
        self.resolve(messages, destination, Some(actor)).await
    }

    /// Send each message to `destination` and remove it from staging, without audit
    #[instrument(
        skip(self, messages, destination),
        fields(count = messages.len(), destination = %destination)
    )]
    pub async fn abort_messages(
        &self,
        messages: Vec<QueueMessage>,
        destination: &QueueName,
    ) -> BatchReport {
        self.resolve(messages, destination, None).await
    }

    /// Replay staged messages by id, each to the processing queue of its error queue
    ///
    /// Ids that are no longer staged are skipped.
    pub async fn replay_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
        actor: &AuditActor,
    ) -> Result<BatchReport, StoreError> {
        let messages = self.store.query_by_ids(owner, ids).await?;
        let mut report = BatchReport::default();
        let mut routes: BTreeMap<QueueName, Vec<QueueMessage>> = BTreeMap::new();

        for message in messages {
            match self.rules.processing_queue_for(&message.queue) {
                Ok(destination) => routes.entry(destination).or_default().push(message),
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        queue = %message.queue,
                        error = %e,
                        "No processing queue for error queue"
                    );
                    report.attempted += 1;
                    report.failures.push(BatchFailure {
                        message_ids: vec![message.id],
                        stage: BatchStage::Route,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for (destination, messages) in routes {
            report.absorb(self.replay_messages(messages, &destination, actor).await);
        }
        Ok(report)
    }

    /// Abort staged messages by id back to the error queue each came from
    ///
    /// Ids that are no longer staged are skipped.
    pub async fn abort_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
    ) -> Result<BatchReport, StoreError> {
        let messages = self.store.query_by_ids(owner, ids).await?;
        Ok(self.abort_to_source_queues(messages).await)
    }

    /// Abort everything the user has staged and close their session once drained
    ///
    /// Each message goes back to the error queue it was staged from.
    #[instrument(skip(self, owner), fields(user_id = %owner))]
    pub async fn release_all(&self, owner: &UserId) -> Result<BatchReport, StoreError> {
        let messages = self.store.query(owner, &SearchProperties::default()).await?;
        let report = self.abort_to_source_queues(messages).await;

        if self.store.count(owner, None).await? == 0 {
            self.sessions.delete_user_session(owner).await?;
        } else {
            warn!(
                unresolved = report.unresolved(),
                "Messages remain staged; keeping session"
            );
        }

        Ok(report)
    }

    /// End the user's session; returns whether one existed
    ///
    /// Fails with [`SalvageError::SessionInUse`] while messages are staged,
    /// since the sweep only reclaims messages that still have a session.
    pub async fn end_session(&self, owner: &UserId) -> Result<bool, SalvageError> {
        let staged = self.store.count(owner, None).await?;
        if staged > 0 {
            let queue = self
                .sessions
                .get_user_session(owner)
                .await?
                .map(|s| s.queue.to_string())
                .unwrap_or_default();
            warn!(user_id = %owner, staged, "Refusing to end session with staged messages");
            return Err(SalvageError::SessionInUse {
                user_id: owner.to_string(),
                queue,
                staged,
            });
        }

        Ok(self.sessions.delete_user_session(owner).await?)
    }

    /// Remove staged messages without sending them anywhere
    pub async fn discard_by_ids(
        &self,
        owner: &UserId,
        ids: &[MessageId],
    ) -> Result<BatchReport, StoreError> {
        let known: Vec<MessageId> = self
            .store
            .query_by_ids(owner, ids)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut report = BatchReport {
            attempted: known.len(),
            ..Default::default()
        };

        let store = &self.store;
        let outcomes = batching::execute(known, self.batch_size, move |chunk: Vec<MessageId>| {
            async move {
                match store.delete_batch(owner, &chunk).await {
                    Ok(()) => Ok(chunk.len()),
                    Err(e) => Err(BatchFailure {
                        message_ids: chunk,
                        stage: BatchStage::Delete,
                        reason: e.to_string(),
                    }),
                }
            }
        })
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(deleted) => report.resolved += deleted,
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            user_id = %owner,
            discarded = report.resolved,
            attempted = report.attempted,
            "Discarded staged messages"
        );
        Ok(report)
    }

    /// Move up to `quantity` messages from `queue` into the user's staging partition
    ///
    /// Opens or refreshes the user's session on `queue` first, and fails with
    /// [`SalvageError::SessionInUse`] if the user still has messages staged from
    /// another queue. Messages already staged are dropped. Messages whose store
    /// write fails have already been removed from the broker, so they are sent
    /// back to `queue`.
    #[instrument(skip(self, owner, queue), fields(user_id = %owner, queue = %queue))]
    pub async fn stage_messages(
        &self,
        owner: &UserId,
        queue: &QueueName,
        quantity: u64,
    ) -> Result<StageReport, SalvageError> {
        self.ensure_queue_free(owner, queue).await?;
        let session = self.sessions.create_user_session(owner, queue).await?;
        let received = self.broker.receive_and_ack(queue, quantity, owner).await?;
        let received_count = received.len();
        let (received, already_staged) = self.split_already_staged(owner, received).await;

        let mut report = StageReport {
            queue: queue.clone(),
            session_id: session.id,
            received: received_count,
            staged: 0,
            already_staged,
            returned_to_queue: 0,
            lost: Vec::new(),
        };

        let store = &self.store;
        let outcomes = batching::execute(received, self.batch_size, move |batch: Vec<QueueMessage>| {
            async move {
                match store.create_batch(owner, &batch).await {
                    Ok(()) => Ok(batch.len()),
                    Err(error) => Err(FailedWrite {
                        messages: batch,
                        error,
                    }),
                }
            }
        })
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(staged) => report.staged += staged,
                Err(failed) => {
                    warn!(error = %failed, "Returning unstaged messages to their queue");
                    for message in failed.messages {
                        match self.broker.send(&message, queue).await {
                            Ok(()) => report.returned_to_queue += 1,
                            Err(e) => {
                                error!(
                                    message_id = %message.id,
                                    error = %e,
                                    "Message could not be staged or returned to its queue"
                                );
                                report.lost.push(message.id);
                            }
                        }
                    }
                }
            }
        }

        info!(
            received = report.received,
            staged = report.staged,
            already_staged = report.already_staged.len(),
            returned = report.returned_to_queue,
            lost = report.lost.len(),
            "Staged messages"
        );
        Ok(report)
    }

    /// Refuse a queue switch while messages from the session's queue are staged
    async fn ensure_queue_free(&self, owner: &UserId, queue: &QueueName) -> Result<(), SalvageError> {
        let Some(existing) = self.sessions.get_user_session(owner).await? else {
            return Ok(());
        };
        if existing.queue == *queue {
            return Ok(());
        }

        let staged = self.store.count(owner, None).await?;
        if staged > 0 {
            warn!(
                active_queue = %existing.queue,
                staged,
                "User has messages staged from another queue"
            );
            return Err(SalvageError::SessionInUse {
                user_id: owner.to_string(),
                queue: existing.queue.to_string(),
                staged,
            });
        }
        Ok(())
    }

    /// Separate received messages whose id is already staged, or repeated in the read
    ///
    /// A failed lookup keeps every message; the store write then rejects any
    /// conflict and the batch goes back to its queue.
    async fn split_already_staged(
        &self,
        owner: &UserId,
        received: Vec<QueueMessage>,
    ) -> (Vec<QueueMessage>, Vec<MessageId>) {
        let ids: Vec<MessageId> = received.iter().map(|m| m.id.clone()).collect();
        let mut seen: HashSet<MessageId> = match self.store.query_by_ids(owner, &ids).await {
            Ok(staged) => staged.into_iter().map(|m| m.id).collect(),
            Err(e) => {
                warn!(error = %e, "Could not check for already staged messages");
                HashSet::new()
            }
        };

        let mut fresh = Vec::with_capacity(received.len());
        let mut duplicates = Vec::new();
        for message in received {
            if seen.insert(message.id.clone()) {
                fresh.push(message);
            } else {
                info!(message_id = %message.id, "Message already staged; dropping redelivered copy");
                duplicates.push(message.id);
            }
        }
        (fresh, duplicates)
    }

    /// Abort each message to the error queue it was staged from
    pub async fn abort_to_source_queues(&self, messages: Vec<QueueMessage>) -> BatchReport {
        let mut by_queue: BTreeMap<QueueName, Vec<QueueMessage>> = BTreeMap::new();
        for message in messages {
            by_queue.entry(message.queue.clone()).or_default().push(message);
        }

        let mut report = BatchReport::default();
        for (queue, messages) in by_queue {
            report.absorb(self.abort_messages(messages, &queue).await);
        }
        report
    }

    async fn resolve(
        &self,
        messages: Vec<QueueMessage>,
        destination: &QueueName,
        actor: Option<&AuditActor>,
    ) -> BatchReport {
        let mut report = BatchReport {
            attempted: messages.len(),
            ..Default::default()
        };

        let mut by_owner: BTreeMap<UserId, Vec<QueueMessage>> = BTreeMap::new();
        for message in messages {
            by_owner.entry(message.user_id.clone()).or_default().push(message);
        }

        for (owner, owned) in by_owner {
            let owner = &owner;
            let outcomes = batching::execute(owned, self.batch_size, move |batch| {
                self.process_batch(owner, batch, destination, actor)
            })
            .await;

            for outcome in outcomes {
                match outcome {
                    Ok(done) => {
                        report.resolved += done.resolved;
                        report.audit_failures += done.audit_failures;
                    }
                    Err(failure) => {
                        warn!(
                            destination = %destination,
                            stage = %failure.stage,
                            messages = failure.message_ids.len(),
                            reason = %failure.reason,
                            "Batch not resolved; continuing with next batch"
                        );
                        report.failures.push(failure);
                    }
                }
            }
        }

        info!(
            operation = if actor.is_some() { "replay" } else { "abort" },
            attempted = report.attempted,
            resolved = report.resolved,
            failed_batches = report.failures.len(),
            "Batch operation finished"
        );
        report
    }

    /// Send every message, then delete every message, then audit (replay only)
    async fn process_batch(
        &self,
        owner: &UserId,
        batch: Vec<QueueMessage>,
        destination: &QueueName,
        actor: Option<&AuditActor>,
    ) -> Result<BatchOutcome, BatchFailure> {
        let ids: Vec<MessageId> = batch.iter().map(|m| m.id.clone()).collect();

        for message in &batch {
            if let Err(e) = self.broker.send(message, destination).await {
                return Err(BatchFailure {
                    message_ids: ids,
                    stage: BatchStage::Send,
                    reason: format!("message '{}': {}", message.id, e),
                });
            }
        }

        if let Err(e) = self.store.delete_batch(owner, &ids).await {
            return Err(BatchFailure {
                message_ids: ids,
                stage: BatchStage::Delete,
                reason: e.to_string(),
            });
        }

        let mut audit_failures = 0;
        if let Some(actor) = actor {
            for message in &batch {
                let event = ReplayAuditEvent::new(message, destination, actor);
                if let Err(e) = self.audit.write_event(&event).await {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "Failed to write replay audit event"
                    );
                    audit_failures += 1;
                }
            }
        }

        Ok(BatchOutcome {
            resolved: batch.len(),
            audit_failures,
        })
    }
}

#[cfg(test)]
#[path = "message_service_tests.rs"]
mod tests;
