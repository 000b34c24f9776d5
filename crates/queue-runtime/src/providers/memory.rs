//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a queue implementation that mirrors the broker
//! behaviour the recovery pipeline relies on:
//! - Named queues that must exist before they can be used
//! - Monotonic sequence numbers per queue
//! - Non-destructive peeking with a per-receiver cursor
//! - Lock-on-receive, removal on completion, release on close
//!
//! This provider is intended for:
//! - Unit and integration testing of queue-runtime consumers
//! - Local development without a broker

use crate::client::{MessageReceiver, QueueProvider, ReceiveMode};
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueName, QueueRuntimeInfo, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Available messages in sequence order
    messages: VecDeque<StoredMessage>,
    /// Messages locked by a receiver, keyed by lock token
    locked: HashMap<String, StoredMessage>,
    next_sequence: i64,
}

impl InMemoryQueue {
    fn depth(&self) -> u64 {
        (self.messages.len() + self.locked.len()) as u64
    }

    /// Put a released message back at its sequence position
    fn release(&mut self, message: StoredMessage) {
        let position = self
            .messages
            .iter()
            .position(|m| m.sequence_number > message.sequence_number)
            .unwrap_or(self.messages.len());
        self.messages.insert(position, message);
    }
}

#[derive(Clone)]
struct StoredMessage {
    message: Message,
    message_id: MessageId,
    sequence_number: i64,
    enqueued_at: Timestamp,
    delivery_count: u32,
}

impl StoredMessage {
    fn to_received(&self, receipt_handle: Option<ReceiptHandle>) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.message.body.clone(),
            properties: self.message.properties.clone(),
            correlation_id: self.message.correlation_id.clone(),
            content_type: self.message.content_type.clone(),
            label: self.message.label.clone(),
            sequence_number: self.sequence_number,
            delivery_count: self.delivery_count,
            enqueued_at: Some(self.enqueued_at),
            receipt_handle,
        }
    }
}

fn poisoned() -> QueueError {
    QueueError::ProviderError {
        provider: ProviderType::InMemory.to_string(),
        code: "LockPoisoned".to_string(),
        message: "queue storage lock poisoned".to_string(),
    }
}

fn read_storage(
    storage: &RwLock<QueueStorage>,
) -> Result<RwLockReadGuard<'_, QueueStorage>, QueueError> {
    storage.read().map_err(|_| poisoned())
}

fn write_storage(
    storage: &RwLock<QueueStorage>,
) -> Result<RwLockWriteGuard<'_, QueueStorage>, QueueError> {
    storage.write().map_err(|_| poisoned())
}

// ============================================================================
// Provider
// ============================================================================

/// In-memory broker holding every queue in process memory
#[derive(Clone)]
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create provider and the queues named in the configuration
    pub fn new(config: InMemoryConfig) -> Result<Self, QueueError> {
        let mut queues = HashMap::new();
        for name in &config.queues {
            let queue_name = QueueName::new(name.clone())?;
            queues.insert(queue_name, InMemoryQueue::default());
        }

        Ok(Self {
            storage: Arc::new(RwLock::new(QueueStorage { queues, config })),
        })
    }

    /// Create a queue if it does not exist yet
    pub fn create_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut storage = write_storage(&self.storage)?;
        storage.queues.entry(queue.clone()).or_default();
        Ok(())
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage {
                queues: HashMap::new(),
                config: InMemoryConfig::default(),
            })),
        }
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn list_queues(&self) -> Result<Vec<QueueRuntimeInfo>, QueueError> {
        let storage = read_storage(&self.storage)?;
        Ok(storage
            .queues
            .iter()
            .map(|(name, queue)| QueueRuntimeInfo {
                name: name.clone(),
                active_message_count: queue.depth(),
                dead_letter_message_count: 0,
                total_message_count: queue.depth(),
            })
            .collect())
    }

    async fn get_queue_info(&self, queue: &QueueName) -> Result<QueueRuntimeInfo, QueueError> {
        let storage = read_storage(&self.storage)?;
        let state = storage
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            })?;

        Ok(QueueRuntimeInfo {
            name: queue.clone(),
            active_message_count: state.depth(),
            dead_letter_message_count: 0,
            total_message_count: state.depth(),
        })
    }

    async fn open_receiver(
        &self,
        queue: &QueueName,
        mode: ReceiveMode,
        _max_wait: Duration,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        {
            let storage = read_storage(&self.storage)?;
            if !storage.queues.contains_key(queue) {
                return Err(QueueError::QueueNotFound {
                    queue_name: queue.to_string(),
                });
            }
        }

        Ok(Box::new(InMemoryReceiver {
            storage: Arc::clone(&self.storage),
            queue: queue.clone(),
            mode,
            peek_cursor: Mutex::new(None),
            held_locks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn send_message(&self, queue: &QueueName, message: &Message) -> Result<(), QueueError> {
        let mut storage = write_storage(&self.storage)?;
        let max_queue_size = storage.config.max_queue_size;
        let state = storage
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            })?;

        if state.depth() as usize >= max_queue_size {
            return Err(QueueError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "QueueFull".to_string(),
                message: format!("queue '{}' holds {} messages", queue, max_queue_size),
            });
        }

        state.next_sequence += 1;
        let stored = StoredMessage {
            message: message.clone(),
            message_id: message.message_id.clone().unwrap_or_default(),
            sequence_number: state.next_sequence,
            enqueued_at: Timestamp::now(),
            delivery_count: 0,
        };
        state.messages.push_back(stored);

        tracing::trace!(queue = %queue, sequence_number = state.next_sequence, "Message enqueued");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// Receiver
// ============================================================================

struct InMemoryReceiver {
    storage: Arc<RwLock<QueueStorage>>,
    queue: QueueName,
    mode: ReceiveMode,
    /// Highest sequence number returned by a peek
    peek_cursor: Mutex<Option<i64>>,
    /// Lock tokens taken by this receiver and not yet completed
    held_locks: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ProviderError {
                provider: ProviderType::InMemory.to_string(),
                code: "ReceiverClosed".to_string(),
                message: format!("receiver for '{}' is closed", self.queue),
            });
        }
        Ok(())
    }

    fn queue_missing(&self) -> QueueError {
        QueueError::QueueNotFound {
            queue_name: self.queue.to_string(),
        }
    }

    fn peek(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let storage = read_storage(&self.storage)?;
        let state = storage
            .queues
            .get(&self.queue)
            .ok_or_else(|| self.queue_missing())?;

        let mut cursor = self.peek_cursor.lock().map_err(|_| poisoned())?;
        let after = cursor.unwrap_or(i64::MIN);

        let mut visible: Vec<&StoredMessage> = state
            .messages
            .iter()
            .chain(state.locked.values())
            .filter(|m| m.sequence_number > after)
            .collect();
        visible.sort_by_key(|m| m.sequence_number);

        let batch: Vec<ReceivedMessage> = visible
            .into_iter()
            .take(max_messages)
            .map(|m| m.to_received(None))
            .collect();

        if let Some(last) = batch.last() {
            *cursor = Some(last.sequence_number);
        }
        Ok(batch)
    }

    fn lock_batch(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut storage = write_storage(&self.storage)?;
        let state = storage
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| self.queue_missing())?;
        let mut held = self.held_locks.lock().map_err(|_| poisoned())?;

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut stored) = state.messages.pop_front() else {
                break;
            };
            stored.delivery_count += 1;

            let token = uuid::Uuid::new_v4().to_string();
            let receipt = ReceiptHandle::new(token.clone(), ProviderType::InMemory);
            batch.push(stored.to_received(Some(receipt)));

            state.locked.insert(token.clone(), stored);
            held.push(token);
        }

        Ok(batch)
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive_messages(
        &self,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.ensure_open()?;

        let max_size = ProviderType::InMemory.max_receive_batch();
        if max_messages > max_size {
            return Err(QueueError::BatchTooLarge {
                size: max_messages as usize,
                max_size: max_size as usize,
            });
        }

        match self.mode {
            ReceiveMode::PeekOnly => self.peek(max_messages as usize),
            ReceiveMode::ReceiveAndComplete => self.lock_batch(max_messages as usize),
        }
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.ensure_open()?;

        let mut storage = write_storage(&self.storage)?;
        let state = storage
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| self.queue_missing())?;

        if state.locked.remove(receipt.handle()).is_none() {
            return Err(QueueError::MessageNotFound {
                receipt: receipt.handle().to_string(),
            });
        }

        let mut held = self.held_locks.lock().map_err(|_| poisoned())?;
        held.retain(|token| token != receipt.handle());
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut storage = write_storage(&self.storage)?;
        let mut held = self.held_locks.lock().map_err(|_| poisoned())?;
        if let Some(state) = storage.queues.get_mut(&self.queue) {
            for token in held.drain(..) {
                if let Some(message) = state.locked.remove(&token) {
                    state.release(message);
                }
            }
        }
        Ok(())
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    fn mode(&self) -> ReceiveMode {
        self.mode
    }
}
