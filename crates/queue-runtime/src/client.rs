//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{Message, QueueName, QueueRuntimeInfo, ReceiptHandle, ReceivedMessage};
use crate::provider::{ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{AzureServiceBusProvider, InMemoryProvider};
use async_trait::async_trait;
use std::time::Duration;

/// How a receiver reads messages from a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Read without removing; messages stay available to other consumers
    PeekOnly,
    /// Lock messages on read; completed messages are removed, the rest are released on close
    ReceiveAndComplete,
}

/// Main interface for queue operations
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// List every queue in the namespace with its runtime counters
    async fn list_queues(&self) -> Result<Vec<QueueRuntimeInfo>, QueueError>;

    /// Get runtime counters for one queue
    async fn get_queue_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError>;

    /// Open a receiver bound to one queue
    async fn open_receiver(
        &self,
        queue: &QueueName,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, QueueError>;

    /// Send a single message to a queue
    async fn send_message(&self, queue: &QueueName, message: &Message) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Largest number of messages one receive call may request
    fn max_receive_batch(&self) -> u32;
}

/// A receiver holding broker-side state (cursor, locks) for one queue
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Receive up to `max_messages`; an empty result means the queue has nothing more to give
    async fn receive_messages(&self, max_messages: u32)
        -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Remove a locked message from the queue
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Release every lock still held and end the receiver
    async fn close(&self) -> Result<(), QueueError>;

    /// Queue this receiver is bound to
    fn queue_name(&self) -> &QueueName;

    /// Mode the receiver was opened with
    fn mode(&self) -> ReceiveMode;
}

/// Interface implemented by specific queue providers (Azure, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    async fn list_queues(&self) -> Result<Vec<QueueRuntimeInfo>, QueueError>;

    async fn get_queue_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError>;

    /// Open a receiver; `max_wait` bounds how long an empty receive may block
    async fn open_receiver(
        &self,
        queue: &QueueName,
        mode: ReceiveMode,
        max_wait: Duration,
    ) -> Result<Box<dyn MessageReceiver>, QueueError>;

    async fn send_message(&self, queue: &QueueName, message: &Message) -> Result<(), QueueError>;

    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating queue clients from configuration
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        let provider: Box<dyn QueueProvider> = match &config.provider {
            ProviderConfig::AzureServiceBus(azure_config) => {
                Box::new(AzureServiceBusProvider::new(azure_config.clone())?)
            }
            ProviderConfig::InMemory(memory_config) => {
                Box::new(InMemoryProvider::new(memory_config.clone())?)
            }
        };

        Ok(Box::new(StandardQueueClient::new(provider, config)))
    }

    /// Create client around an already constructed provider
    pub fn from_provider(provider: Box<dyn QueueProvider>) -> Box<dyn QueueClient> {
        Box::new(StandardQueueClient::new(provider, QueueConfig::default()))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    config: QueueConfig,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>, config: QueueConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn list_queues(&self) -> Result<Vec<QueueRuntimeInfo>, QueueError> {
        let mut queues = self.provider.list_queues().await?;
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(queues)
    }

    async fn get_queue_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        self.provider.get_queue_info(queue).await
    }

    async fn open_receiver(
        &self,
        queue: &QueueName,
        mode: ReceiveMode,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        self.provider
            .open_receiver(queue, mode, self.config.receive_wait())
            .await
    }

    async fn send_message(&self, queue: &QueueName, message: &Message) -> Result<(), QueueError> {
        let max_size = self.provider.provider_type().max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        self.provider.send_message(queue, message).await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    fn max_receive_batch(&self) -> u32 {
        self.provider.provider_type().max_receive_batch()
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
