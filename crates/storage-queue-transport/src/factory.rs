//! Queue handle provider.
//!
//! The transport never talks to a [`StorageAccount`] directly. It resolves
//! queue handles through a [`QueueFactory`] so hosts and tests can swap the
//! lookup and provisioning strategy without touching the send or receive
//! paths.

use crate::error::TransportError;
use crate::message::QueueName;
use crate::queue::{StorageAccount, StorageQueue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Resolves queue names to handles and provisions missing queues
#[async_trait]
pub trait QueueFactory: Send + Sync {
    /// Get a handle for the named queue
    async fn get_queue(&self, name: &QueueName) -> Result<Arc<dyn StorageQueue>, TransportError>;

    /// Make sure the named queue exists
    async fn create_queue_if_missing(&self, name: &QueueName) -> Result<(), TransportError>;
}

/// Factory backed by a storage account, caching one handle per queue
pub struct DefaultQueueFactory {
    account: Arc<dyn StorageAccount>,
    automatically_create_queues: bool,
    handles: RwLock<HashMap<QueueName, Arc<dyn StorageQueue>>>,
}

impl DefaultQueueFactory {
    /// Create a factory; with `automatically_create_queues` off, creation is skipped
    pub fn new(account: Arc<dyn StorageAccount>, automatically_create_queues: bool) -> Self {
        Self {
            account,
            automatically_create_queues,
            handles: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl QueueFactory for DefaultQueueFactory {
    async fn get_queue(&self, name: &QueueName) -> Result<Arc<dyn StorageQueue>, TransportError> {
        {
            let handles = self.handles.read().await;
            if let Some(queue) = handles.get(name) {
                return Ok(Arc::clone(queue));
            }
        }

        let mut handles = self.handles.write().await;
        let queue = handles
            .entry(name.clone())
            .or_insert_with(|| self.account.queue(name));
        Ok(Arc::clone(queue))
    }

    async fn create_queue_if_missing(&self, name: &QueueName) -> Result<(), TransportError> {
        if !self.automatically_create_queues {
            info!(queue_name = %name, "Automatic queue creation disabled, skipping");
            return Ok(());
        }

        let queue = self.get_queue(name).await?;
        let created = queue.create_if_not_exists().await.map_err(|e| {
            TransportError::QueueCreationFailed {
                queue_name: name.to_string(),
                source: e,
            }
        })?;

        if created {
            info!(queue_name = %name, "Created queue");
        } else {
            debug!(queue_name = %name, "Queue already exists");
        }
        Ok(())
    }
}
