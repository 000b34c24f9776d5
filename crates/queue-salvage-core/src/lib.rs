//! # Queue-Salvage Core
//!
//! Dead-letter recovery pipeline for messages that failed processing.
//!
//! Failed messages are read from broker error queues, staged in a per-user
//! document store for search and triage, and then either replayed to their
//! processing queue or aborted back to the error queue. Expired operator
//! sessions are swept so that no staged message is left behind.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`broker::BrokerClient`],
//!   [`staging::StagingStore`], [`sessions::UserSessionStore`], [`audit::AuditWriter`])
//! - Infrastructure implementations live in [`adapters`] and in `queue-runtime`
//! - Batches of work report their outcome as values instead of only logging
//!
//! ## Usage
//!
//! ```rust
//! use queue_salvage_core::{UserId, UserSessionId};
//!
//! let user = UserId::new("operator@example.com".to_string()).unwrap();
//! let session = UserSessionId::new();
//! assert_eq!(user.as_str(), "operator@example.com");
//! assert!(!session.to_string().is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use queue_runtime::{Message, MessageId, QueueName, Timestamp, ValidationError};
pub use ulid::Ulid;

/// Standard result type for composite pipeline operations
pub type SalvageResult<T> = Result<T, SalvageError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identity of the operator owning staged messages and sessions.
///
/// Also the partition key of the staging store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create new user ID with validation
    pub fn new(value: String) -> Result<Self, ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "user_id".to_string(),
            });
        }

        if value.len() > 256 {
            return Err(ValidationError::OutOfRange {
                field: "user_id".to_string(),
                message: "maximum 256 characters".to_string(),
            });
        }

        if value.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "user_id".to_string(),
                message: "control characters not allowed".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// Unique identifier for a user session record
///
/// Uses ULID so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserSessionId(Ulid);

impl UserSessionId {
    /// Generate a new unique session ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UserSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserSessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ValidationError::InvalidFormat {
            field: "session_id".to_string(),
            message: format!("expected ULID, got '{}'", s),
        })?;
        Ok(Self(ulid))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error type for composite pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum SalvageError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Broker error: {0}")]
    Broker(#[from] broker::BrokerError),

    #[error("Staging store error: {0}")]
    Store(#[from] staging::StoreError),

    #[error("Query error: {0}")]
    Query(#[from] query::QueryError),

    #[error("Audit error: {0}")]
    Audit(#[from] audit::AuditError),

    #[error("User '{user_id}' still has {staged} message(s) staged from '{queue}'")]
    SessionInUse {
        user_id: String,
        queue: String,
        staged: u64,
    },
}

impl SalvageError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Broker(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            Self::Query(_) => false,
            Self::Audit(_) => true,
            Self::SessionInUse { .. } => false,
        }
    }
}

// ============================================================================
// Modules
// ============================================================================

/// Storage and broker adapters
pub mod adapters;

/// Replay audit events and writers
pub mod audit;

/// Fixed-size batching of work
pub mod batching;

/// Broker client: queue discovery, batched retrieval, send
pub mod broker;

/// Replay, abort and staging orchestration
pub mod message_service;

/// Structured staging-store queries
pub mod query;

/// Operator sessions
pub mod sessions;

/// Staged message model and store contract
pub mod staging;

/// Expired session sweep
pub mod sweep;

/// Read models for the triage views
pub mod triage;

pub use adapters::{FilesystemStagingStore, InMemoryStagingStore, JsonLinesAuditWriter};
pub use audit::{
    AuditActor, AuditError, AuditId, AuditWriter, ReplayAuditEvent, TracingAuditWriter,
};
pub use broker::{BrokerClient, BrokerError, QueueInfo, QueueNameRules, ServiceBusBrokerClient};
pub use message_service::{BatchFailure, BatchReport, BatchStage, MessageService, StageReport};
pub use query::{MessageQuery, QueryError, SearchProperties, SortField, SortOrder};
pub use sessions::{UserSession, UserSessionService, UserSessionStore};
pub use staging::{InvestigationCount, QueueMessage, StagingStore, StoreError};
pub use sweep::{SessionSweep, SkippedSession, SweepReport, SweepSettings};
pub use triage::{MessageListing, QueueOverview, TriageQueries};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
