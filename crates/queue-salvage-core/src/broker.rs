//! Broker client: error queue discovery, batched retrieval and re-publishing.
//!
//! Wraps a `queue-runtime` [`QueueClient`] with the pipeline's rules:
//! which queues are error queues, how a raw broker message becomes a
//! [`QueueMessage`], and how many messages a single request may ask for.

use crate::batching;
use crate::staging::QueueMessage;
use crate::{QueueName, UserId, ValidationError};
use async_trait::async_trait;
use queue_runtime::{MessageReceiver, QueueClient, QueueError, ReceiveMode, ReceivedMessage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Property carrying the endpoint that originally sent the message
pub const ORIGINATING_ENDPOINT_PROPERTY: &str = "NServiceBus.OriginatingEndpoint";
/// Property carrying the endpoint whose handler failed
pub const PROCESSING_ENDPOINT_PROPERTY: &str = "NServiceBus.ProcessingEndpoint";
/// Property carrying the failure message
pub const EXCEPTION_MESSAGE_PROPERTY: &str = "NServiceBus.ExceptionInfo.Message";
/// Property carrying the failure type name
pub const EXCEPTION_TYPE_PROPERTY: &str = "NServiceBus.ExceptionInfo.ExceptionType";

/// Default pattern classifying error queues
pub const DEFAULT_ERROR_QUEUE_PATTERN: &str = "-errors?$";

/// Default suffix stripped from an error queue to find its processing queue
pub const DEFAULT_ERROR_SUFFIX_PATTERN: &str = "-errors?$";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by broker operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message '{message_id}' is missing required property '{property}'")]
    MalformedMessage { message_id: String, property: String },

    #[error("Send rejected for message '{message_id}': {reason}")]
    SendRejected { message_id: String, reason: String },

    #[error("Broker operation failed: {message}")]
    OperationFailed { message: String },
}

impl BrokerError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BrokerUnavailable { .. } => true,
            Self::OperationFailed { .. } => true,
            Self::QueueNotFound { .. } => false,
            Self::MalformedMessage { .. } => false,
            Self::SendRejected { .. } => false,
        }
    }
}

impl From<QueueError> for BrokerError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::QueueNotFound { queue_name } => Self::QueueNotFound { queue_name },
            e if e.is_unavailable() => Self::BrokerUnavailable {
                message: e.to_string(),
            },
            e => Self::OperationFailed {
                message: e.to_string(),
            },
        }
    }
}

// ============================================================================
// Core Types
// ============================================================================

/// Broker-reported depth of one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u64,
}

/// Naming rules that classify error queues and map them to processing queues
#[derive(Debug, Clone)]
pub struct QueueNameRules {
    error_queue_pattern: Regex,
    error_suffix_pattern: Regex,
}

impl QueueNameRules {
    /// Compile the classification and suffix patterns
    pub fn new(error_queue_pattern: &str, error_suffix_pattern: &str) -> Result<Self, ValidationError> {
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| ValidationError::InvalidFormat {
                field: field.to_string(),
                message: e.to_string(),
            })
        };

        Ok(Self {
            error_queue_pattern: compile("error_queue_pattern", error_queue_pattern)?,
            error_suffix_pattern: compile("error_suffix_pattern", error_suffix_pattern)?,
        })
    }

    /// True when the queue name is classified as an error queue
    pub fn is_error_queue(&self, queue_name: &str) -> bool {
        self.error_queue_pattern.is_match(queue_name)
    }

    /// Processing queue for an error queue, with the error suffix removed
    pub fn processing_queue_for(&self, error_queue: &QueueName) -> Result<QueueName, ValidationError> {
        let stripped = self.error_suffix_pattern.replace_all(error_queue.as_str(), "");
        QueueName::new(stripped.into_owned())
    }
}

impl Default for QueueNameRules {
    fn default() -> Self {
        Self {
            error_queue_pattern: Regex::new(DEFAULT_ERROR_QUEUE_PATTERN)
                .expect("DEFAULT_ERROR_QUEUE_PATTERN is a valid regex"),
            error_suffix_pattern: Regex::new(DEFAULT_ERROR_SUFFIX_PATTERN)
                .expect("DEFAULT_ERROR_SUFFIX_PATTERN is a valid regex"),
        }
    }
}

/// Project a raw broker message into a staged message owned by `owner`
///
/// All four processing properties are required; a message lacking any of them
/// cannot be categorized and is reported as malformed.
pub fn project_message(
    received: &ReceivedMessage,
    queue: &QueueName,
    owner: &UserId,
    read_only: bool,
) -> Result<QueueMessage, BrokerError> {
    let required = |property: &str| -> Result<String, BrokerError> {
        received
            .property(property)
            .map(str::to_string)
            .ok_or_else(|| {
                error!(
                    message_id = %received.message_id,
                    queue = %queue,
                    property = property,
                    "Broker message missing required property"
                );
                BrokerError::MalformedMessage {
                    message_id: received.message_id.to_string(),
                    property: property.to_string(),
                }
            })
    };

    Ok(QueueMessage {
        id: received.message_id.clone(),
        user_id: owner.clone(),
        queue: queue.clone(),
        originating_endpoint: required(ORIGINATING_ENDPOINT_PROPERTY)?,
        processing_endpoint: required(PROCESSING_ENDPOINT_PROPERTY)?,
        exception: required(EXCEPTION_MESSAGE_PROPERTY)?,
        exception_type: required(EXCEPTION_TYPE_PROPERTY)?,
        body: String::from_utf8_lossy(&received.body).into_owned(),
        original_message: received.message(),
        is_read_only: read_only,
    })
}

// ============================================================================
// Client Contract
// ============================================================================

/// Pipeline view of the message broker
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// All error queues with their depth, ordered by name
    async fn list_error_queues(&self) -> Result<Vec<QueueInfo>, BrokerError>;

    /// Depth of one queue; empty or unknown names yield a zero-value result
    async fn get_queue_details(&self, queue_name: &str) -> Result<QueueInfo, BrokerError>;

    /// Read up to `quantity` messages without removing them; copies are read-only
    async fn peek(
        &self,
        queue: &QueueName,
        quantity: u64,
        owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError>;

    /// Remove and return up to `quantity` messages, clamped to the queue's depth
    async fn receive_and_ack(
        &self,
        queue: &QueueName,
        quantity: u64,
        owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError>;

    /// Re-publish the message's original payload to `destination`
    async fn send(&self, message: &QueueMessage, destination: &QueueName) -> Result<(), BrokerError>;
}

// ============================================================================
// Service Bus Implementation
// ============================================================================

/// Broker client backed by a `queue-runtime` queue client
pub struct ServiceBusBrokerClient {
    client: Arc<dyn QueueClient>,
    rules: QueueNameRules,
    batch_size: u32,
}

impl ServiceBusBrokerClient {
    /// Create a broker client; `batch_size` is capped at the provider's receive limit
    pub fn new(client: Arc<dyn QueueClient>, rules: QueueNameRules, batch_size: u32) -> Self {
        let batch_size = batch_size.clamp(1, client.max_receive_batch().max(1));
        Self {
            client,
            rules,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn rules(&self) -> &QueueNameRules {
        &self.rules
    }

    async fn read_batched(
        &self,
        receiver: &dyn MessageReceiver,
        quantity: u64,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        batching::collect_in_batches(quantity, u64::from(self.batch_size), move |request| {
            debug!(
                queue = %receiver.queue_name(),
                requested = request,
                "Requesting message batch"
            );
            receiver.receive_messages(request as u32)
        })
        .await
    }

    async fn close_receiver(receiver: &dyn MessageReceiver) {
        if let Err(e) = receiver.close().await {
            warn!(
                queue = %receiver.queue_name(),
                error = %e,
                "Failed to close receiver; held messages will be released on lock expiry"
            );
        }
    }

    /// Acknowledge every projected message, keeping only the ones the broker confirmed
    async fn complete_all(
        receiver: &dyn MessageReceiver,
        received: Vec<ReceivedMessage>,
        projected: Vec<QueueMessage>,
    ) -> Vec<QueueMessage> {
        let mut acknowledged = Vec::with_capacity(projected.len());

        for (raw, message) in received.into_iter().zip(projected) {
            let Some(receipt) = raw.receipt_handle.as_ref() else {
                warn!(message_id = %raw.message_id, "Received message has no receipt; not staging it");
                continue;
            };

            match receiver.complete_message(receipt).await {
                Ok(()) => acknowledged.push(message),
                Err(e) => warn!(
                    message_id = %raw.message_id,
                    error = %e,
                    "Failed to acknowledge message; it stays on the broker"
                ),
            }
        }

        acknowledged
    }
}

#[async_trait]
impl BrokerClient for ServiceBusBrokerClient {
    #[instrument(skip(self))]
    async fn list_error_queues(&self) -> Result<Vec<QueueInfo>, BrokerError> {
        let mut queues: Vec<QueueInfo> = self
            .client
            .list_queues()
            .await
            .map_err(|e| BrokerError::BrokerUnavailable {
                message: e.to_string(),
            })?
            .into_iter()
            .filter(|q| self.rules.is_error_queue(q.name.as_str()))
            .map(|q| QueueInfo {
                name: q.name.to_string(),
                message_count: q.active_message_count,
            })
            .collect();

        queues.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = queues.len(), "Listed error queues");
        Ok(queues)
    }

    async fn get_queue_details(&self, queue_name: &str) -> Result<QueueInfo, BrokerError> {
        if queue_name.trim().is_empty() {
            return Ok(QueueInfo::default());
        }

        let Ok(queue) = QueueName::new(queue_name.to_string()) else {
            debug!(queue = queue_name, "Invalid queue name; reporting zero depth");
            return Ok(QueueInfo {
                name: queue_name.to_string(),
                message_count: 0,
            });
        };

        match self.client.get_queue_info(&queue).await {
            Ok(info) => Ok(QueueInfo {
                name: info.name.to_string(),
                message_count: info.active_message_count,
            }),
            Err(QueueError::QueueNotFound { .. }) => Ok(QueueInfo {
                name: queue_name.to_string(),
                message_count: 0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, queue, owner), fields(queue = %queue, user = %owner))]
    async fn peek(
        &self,
        queue: &QueueName,
        quantity: u64,
        owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        if quantity == 0 {
            return Ok(Vec::new());
        }

        let receiver = self.client.open_receiver(queue, ReceiveMode::PeekOnly).await?;
        let received = self.read_batched(receiver.as_ref(), quantity).await;
        Self::close_receiver(receiver.as_ref()).await;

        let messages = received?
            .iter()
            .map(|m| project_message(m, queue, owner, true))
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = messages.len(), "Peeked messages");
        Ok(messages)
    }

    #[instrument(skip(self, queue, owner), fields(queue = %queue, user = %owner))]
    async fn receive_and_ack(
        &self,
        queue: &QueueName,
        quantity: u64,
        owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        let depth = self.client.get_queue_info(queue).await?.active_message_count;
        let quantity = quantity.min(depth);
        if quantity == 0 {
            debug!(depth, "Nothing to receive");
            return Ok(Vec::new());
        }

        let receiver = self
            .client
            .open_receiver(queue, ReceiveMode::ReceiveAndComplete)
            .await?;

        let outcome = async {
            let received = self.read_batched(receiver.as_ref(), quantity).await?;
            let projected = received
                .iter()
                .map(|m| project_message(m, queue, owner, false))
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, BrokerError>(Self::complete_all(receiver.as_ref(), received, projected).await)
        }
        .await;

        // Close releases anything still locked, including a batch that failed projection
        Self::close_receiver(receiver.as_ref()).await;

        let messages = outcome?;
        info!(requested = quantity, received = messages.len(), "Received messages");
        Ok(messages)
    }

    async fn send(&self, message: &QueueMessage, destination: &QueueName) -> Result<(), BrokerError> {
        if message.is_read_only {
            warn!(
                message_id = %message.id,
                destination = %destination,
                "Refusing to send read-only message"
            );
            return Err(BrokerError::SendRejected {
                message_id: message.id.to_string(),
                reason: "message is a read-only copy".to_string(),
            });
        }

        self.client
            .send_message(destination, &message.original_message)
            .await?;

        debug!(message_id = %message.id, destination = %destination, "Message sent");
        Ok(())
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
