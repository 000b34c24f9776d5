//! # Replay Audit
//!
//! One audit event is written per replayed message, after the message has been
//! sent to its processing queue and removed from staging. Aborts are not
//! audited. Delivery of audit events is the writer's concern; the pipeline
//! only reports write failures.

use crate::staging::QueueMessage;
use crate::{MessageId, QueueName, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use ulid::Ulid;

/// Loopback address as reported by IPv6-first listeners
const IPV6_LOOPBACK: &str = "::1";

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an audit event, sortable by time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditId(Ulid);

impl AuditId {
    /// Generate new audit ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get underlying ULID
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for AuditId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditId {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse().map_err(|_| AuditError::InvalidAuditId {
            audit_id: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Events
// ============================================================================

/// Operator responsible for a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditActor {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_ip: Option<String>,
}

impl AuditActor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            origin_ip: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Record the caller's address; the IPv6 loopback is stored as `127.0.0.1`
    pub fn with_origin_ip(mut self, origin_ip: impl Into<String>) -> Self {
        let origin_ip = origin_ip.into();
        self.origin_ip = Some(if origin_ip.trim() == IPV6_LOOPBACK {
            "127.0.0.1".to_string()
        } else {
            origin_ip
        });
        self
    }
}

/// Record of one message replayed to its processing queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayAuditEvent {
    pub audit_id: AuditId,
    pub message_id: MessageId,
    pub source_queue: QueueName,
    pub destination_queue: QueueName,
    pub actor: AuditActor,
    pub occurred_at: Timestamp,
}

impl ReplayAuditEvent {
    /// Event for `message` replayed to `destination` by `actor`
    pub fn new(message: &QueueMessage, destination: &QueueName, actor: &AuditActor) -> Self {
        Self {
            audit_id: AuditId::new(),
            message_id: message.id.clone(),
            source_queue: message.queue.clone(),
            destination_queue: destination.clone(),
            actor: actor.clone(),
            occurred_at: Timestamp::now(),
        }
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Destination for replay audit events
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Persist one audit event
    async fn write_event(&self, event: &ReplayAuditEvent) -> Result<(), AuditError>;
}

/// Writer emitting audit events as structured log records on the `audit` target
#[derive(Debug, Clone, Default)]
pub struct TracingAuditWriter;

#[async_trait]
impl AuditWriter for TracingAuditWriter {
    async fn write_event(&self, event: &ReplayAuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            audit_id = %event.audit_id,
            message_id = %event.message_id,
            source_queue = %event.source_queue,
            destination_queue = %event.destination_queue,
            user_id = %event.actor.user_id,
            email = event.actor.email.as_deref().unwrap_or(""),
            origin_ip = event.actor.origin_ip.as_deref().unwrap_or(""),
            occurred_at = %event.occurred_at.as_datetime().to_rfc3339(),
            "Message replayed"
        );
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while writing audit events
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Invalid audit ID: {audit_id}")]
    InvalidAuditId { audit_id: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
