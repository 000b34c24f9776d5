//! # Queue Runtime
//!
//! Broker transport layer for reading and re-publishing failed messages.
//!
//! This library provides:
//! - Provider-agnostic queue operations (list, inspect, receive, send)
//! - Receivers that either peek without removing or lock and complete
//! - An Azure Service Bus provider over the REST protocol
//! - An in-memory provider for tests and local development
//!
//! ## Module Organization
//!
//! - [error] - Error types for all queue operations
//! - [message] - Message structures, identifiers and queue counters
//! - [provider] - Provider types and configuration
//! - [client] - Client traits and implementations
//! - [providers] - Concrete provider implementations

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{
    MessageReceiver, QueueClient, QueueClientFactory, QueueProvider, ReceiveMode,
    StandardQueueClient,
};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, QueueName, QueueRuntimeInfo, ReceiptHandle, ReceivedMessage, Timestamp,
};
pub use provider::{
    AzureAuthMethod, AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType,
    QueueConfig,
};
pub use providers::{AzureServiceBusProvider, InMemoryProvider};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
