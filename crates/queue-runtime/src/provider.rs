//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl ProviderType {
    /// Largest number of messages a single receive call may request
    pub fn max_receive_batch(&self) -> u32 {
        match self {
            Self::AzureServiceBus => 100,
            Self::InMemory => 1000,
        }
    }

    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AzureServiceBus => 256 * 1024,
            Self::InMemory => 10 * 1024 * 1024,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureServiceBus => write!(f, "AzureServiceBus"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    /// How long a receive waits on an empty queue before returning nothing
    pub receive_wait_seconds: u64,
}

impl QueueConfig {
    /// Receive wait as a duration
    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_seconds)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            receive_wait_seconds: 1,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    AzureServiceBus(AzureServiceBusConfig),
    InMemory(InMemoryConfig),
}

/// How the Azure provider authenticates against the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzureAuthMethod {
    /// Shared access key taken from the connection string
    #[default]
    ConnectionString,
    /// Bearer token from the instance metadata service
    ManagedIdentity,
}

/// Azure Service Bus configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureServiceBusConfig {
    pub auth_method: AzureAuthMethod,
    /// `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`
    pub connection_string: Option<String>,
    /// Namespace name or fully qualified host, required for managed identity
    pub namespace: Option<String>,
    /// Client id of a user-assigned managed identity
    pub managed_identity_client_id: Option<String>,
    /// Base URL replacing the namespace endpoint (local emulators, tests)
    pub endpoint_override: Option<String>,
    /// Lifetime of generated SAS tokens
    pub token_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for AzureServiceBusConfig {
    fn default() -> Self {
        Self {
            auth_method: AzureAuthMethod::ConnectionString,
            connection_string: None,
            namespace: None,
            managed_identity_client_id: None,
            endpoint_override: None,
            token_ttl_seconds: 3600,
            request_timeout_seconds: 30,
        }
    }
}

impl std::fmt::Debug for AzureServiceBusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureServiceBusConfig")
            .field("auth_method", &self.auth_method)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<REDACTED>"),
            )
            .field("namespace", &self.namespace)
            .field("managed_identity_client_id", &self.managed_identity_client_id)
            .field("endpoint_override", &self.endpoint_override)
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Messages a single queue may hold before sends are refused
    pub max_queue_size: usize,
    /// Queues created when the provider starts
    pub queues: Vec<String>,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            queues: Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
