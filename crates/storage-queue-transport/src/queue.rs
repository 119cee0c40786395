//! Client traits for the cloud queue service.
//!
//! `StorageQueue` is a handle to one physical queue and exposes exactly the
//! calls the transport needs: provisioning, enqueue, leased dequeue, delete,
//! visibility updates and clearing. `StorageAccount` resolves queue names to
//! handles. Providers under [`crate::providers`] implement both.

use crate::error::QueueError;
use crate::message::{MessageId, PopReceipt, QueueMessage, QueueName};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Options applied when a message is put on a queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Message expires and is removed after this long
    pub time_to_live: Option<Duration>,
    /// Message stays invisible for this long after being enqueued
    pub initial_visibility_delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Create new enqueue options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set initial visibility delay
    pub fn with_initial_visibility_delay(mut self, delay: Duration) -> Self {
        self.initial_visibility_delay = Some(delay);
        self
    }
}

/// Handle to a single queue in the queue service
///
/// All calls are network operations. Dropping a returned future cancels the
/// call. Implementations are expected to apply their network retry policy to
/// transient faults.
#[async_trait]
pub trait StorageQueue: Send + Sync {
    /// Name of the queue this handle points to
    fn name(&self) -> &QueueName;

    /// Check whether the queue exists
    async fn exists(&self) -> Result<bool, QueueError>;

    /// Create the queue; returns `false` if it already existed
    async fn create_if_not_exists(&self) -> Result<bool, QueueError>;

    /// Approximate number of messages, visible or not
    async fn approximate_message_count(&self) -> Result<u64, QueueError>;

    /// Put a message on the queue
    async fn send_message(
        &self,
        payload: &str,
        options: &EnqueueOptions,
    ) -> Result<MessageId, QueueError>;

    /// Dequeue up to `max_messages` messages, hiding them for `visibility_timeout`
    async fn receive_messages(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a message; requires the current pop receipt
    async fn delete_message(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
    ) -> Result<(), QueueError>;

    /// Change a leased message's visibility; returns the new pop receipt
    async fn update_visibility(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        visibility_timeout: Duration,
    ) -> Result<PopReceipt, QueueError>;

    /// Delete every message in the queue
    async fn clear(&self) -> Result<(), QueueError>;
}

/// Resolves queue names to queue handles
pub trait StorageAccount: Send + Sync {
    /// Get a handle for the named queue; does not touch the network
    fn queue(&self, name: &QueueName) -> Arc<dyn StorageQueue>;
}
