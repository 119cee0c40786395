//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue service that:
//! - Tracks queue existence (operations on missing queues fail like the real service)
//! - Implements visibility timeouts and message TTL
//! - Issues a new pop receipt on every dequeue and visibility update
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit testing of transport consumers
//! - Development and prototyping
//! - Reference behaviour for the cloud provider

use crate::error::QueueError;
use crate::message::{MessageId, PopReceipt, QueueMessage, QueueName};
use crate::queue::{EnqueueOptions, StorageAccount, StorageQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
}

/// Internal queue state for a single queue (insertion order)
#[derive(Default)]
struct InMemoryQueue {
    messages: Vec<StoredMessage>,
}

impl InMemoryQueue {
    fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.messages.retain(|m| !m.is_expired(now));
    }

    fn find_leased(
        &mut self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        self.purge_expired(now);
        self.messages
            .iter()
            .position(|m| {
                &m.message_id == message_id && m.pop_receipt.as_ref() == Some(pop_receipt)
            })
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: message_id.to_string(),
                pop_receipt: pop_receipt.to_string(),
            })
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    text: String,
    inserted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    next_visible_at: DateTime<Utc>,
    pop_receipt: Option<PopReceipt>,
    dequeue_count: u32,
}

impl StoredMessage {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_visible_at
    }

    fn to_queue_message(&self) -> QueueMessage {
        QueueMessage {
            message_id: self.message_id.clone(),
            pop_receipt: self
                .pop_receipt
                .clone()
                .unwrap_or_else(|| PopReceipt::new("")),
            text: self.text.clone(),
            dequeue_count: self.dequeue_count,
            inserted_at: self.inserted_at,
            expires_at: self.expires_at,
            next_visible_at: self.next_visible_at,
        }
    }
}

fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// InMemoryStorageAccount
// ============================================================================

/// In-memory queue service holding any number of queues
#[derive(Clone, Default)]
pub struct InMemoryStorageAccount {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryStorageAccount {
    /// Create an empty in-memory account
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all existing queues
    pub fn queue_names(&self) -> Vec<QueueName> {
        match self.storage.read() {
            Ok(storage) => {
                let mut names: Vec<_> = storage.queues.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }
}

impl StorageAccount for InMemoryStorageAccount {
    fn queue(&self, name: &QueueName) -> Arc<dyn StorageQueue> {
        Arc::new(InMemoryStorageQueue {
            storage: Arc::clone(&self.storage),
            name: name.clone(),
        })
    }
}

// ============================================================================
// InMemoryStorageQueue
// ============================================================================

/// Handle to one in-memory queue
pub struct InMemoryStorageQueue {
    storage: Arc<RwLock<QueueStorage>>,
    name: QueueName,
}

impl InMemoryStorageQueue {
    fn with_queue<T>(
        &self,
        operation: impl FnOnce(&mut InMemoryQueue, DateTime<Utc>) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut storage = self.storage.write().map_err(|e| QueueError::ServiceError {
            status: 500,
            code: "LockPoisoned".to_string(),
            message: format!("Failed to acquire write lock: {}", e),
        })?;

        let queue =
            storage
                .queues
                .get_mut(&self.name)
                .ok_or_else(|| QueueError::QueueNotFound {
                    queue_name: self.name.to_string(),
                })?;

        operation(queue, Utc::now())
    }
}

#[async_trait]
impl StorageQueue for InMemoryStorageQueue {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        match self.with_queue(|_, _| Ok(())) {
            Ok(()) => Ok(true),
            Err(QueueError::QueueNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        let mut storage = self.storage.write().map_err(|e| QueueError::ServiceError {
            status: 500,
            code: "LockPoisoned".to_string(),
            message: format!("Failed to acquire write lock: {}", e),
        })?;

        if storage.queues.contains_key(&self.name) {
            return Ok(false);
        }

        storage
            .queues
            .insert(self.name.clone(), InMemoryQueue::default());
        Ok(true)
    }

    async fn approximate_message_count(&self) -> Result<u64, QueueError> {
        self.with_queue(|queue, now| {
            queue.purge_expired(now);
            Ok(queue.messages.len() as u64)
        })
    }

    async fn send_message(
        &self,
        payload: &str,
        options: &EnqueueOptions,
    ) -> Result<MessageId, QueueError> {
        self.with_queue(|queue, now| {
            let message_id = MessageId::new();
            queue.messages.push(StoredMessage {
                message_id: message_id.clone(),
                text: payload.to_string(),
                inserted_at: now,
                expires_at: options.time_to_live.map(|ttl| after(now, ttl)),
                next_visible_at: options
                    .initial_visibility_delay
                    .map(|delay| after(now, delay))
                    .unwrap_or(now),
                pop_receipt: None,
                dequeue_count: 0,
            });
            Ok(message_id)
        })
    }

    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.with_queue(|queue, now| {
            queue.purge_expired(now);

            let next_visible_at = after(now, visibility_timeout);
            let received = queue
                .messages
                .iter_mut()
                .filter(|m| m.is_visible(now))
                .take(max_messages as usize)
                .map(|m| {
                    m.pop_receipt = Some(PopReceipt::generate());
                    m.next_visible_at = next_visible_at;
                    m.dequeue_count += 1;
                    m.to_queue_message()
                })
                .collect();

            Ok(received)
        })
    }

    async fn delete_message(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError> {
        self.with_queue(|queue, now| {
            let index = queue.find_leased(message_id, pop_receipt, now)?;
            queue.messages.remove(index);
            Ok(())
        })
    }

    async fn update_visibility(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        visibility_timeout: Duration,
    ) -> Result<PopReceipt, QueueError> {
        self.with_queue(|queue, now| {
            let index = queue.find_leased(message_id, pop_receipt, now)?;
            let message = &mut queue.messages[index];
            let new_receipt = PopReceipt::generate();
            message.pop_receipt = Some(new_receipt.clone());
            message.next_visible_at = after(now, visibility_timeout);
            Ok(new_receipt)
        })
    }

    async fn clear(&self) -> Result<(), QueueError> {
        self.with_queue(|queue, _| {
            queue.messages.clear();
            Ok(())
        })
    }
}
