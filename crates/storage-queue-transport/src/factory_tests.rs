//! Tests for the queue handle provider.

use super::*;
use crate::error::QueueError;
use crate::message::{MessageId, PopReceipt, QueueMessage};
use crate::providers::InMemoryStorageAccount;
use crate::queue::EnqueueOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Account wrapper counting handle lookups
struct CountingAccount {
    inner: InMemoryStorageAccount,
    lookups: AtomicUsize,
}

impl StorageAccount for CountingAccount {
    fn queue(&self, name: &QueueName) -> Arc<dyn StorageQueue> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.queue(name)
    }
}

/// Queue whose creation always fails
struct UnavailableQueue {
    name: QueueName,
}

#[async_trait]
impl StorageQueue for UnavailableQueue {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        Ok(false)
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        Err(QueueError::AuthenticationFailed {
            message: "no permission".to_string(),
        })
    }

    async fn approximate_message_count(&self) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn send_message(&self, _: &str, _: &EnqueueOptions) -> Result<MessageId, QueueError> {
        unimplemented!()
    }

    async fn receive_messages(&self, _: u32, _: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        unimplemented!()
    }

    async fn delete_message(&self, _: &MessageId, _: &PopReceipt) -> Result<(), QueueError> {
        unimplemented!()
    }

    async fn update_visibility(
        &self,
        _: &MessageId,
        _: &PopReceipt,
        _: Duration,
    ) -> Result<PopReceipt, QueueError> {
        unimplemented!()
    }

    async fn clear(&self) -> Result<(), QueueError> {
        unimplemented!()
    }
}

struct UnavailableAccount;

impl StorageAccount for UnavailableAccount {
    fn queue(&self, name: &QueueName) -> Arc<dyn StorageQueue> {
        Arc::new(UnavailableQueue { name: name.clone() })
    }
}

fn name(value: &str) -> QueueName {
    QueueName::new(value).unwrap()
}

#[tokio::test]
async fn test_get_queue_caches_handles() {
    let account = Arc::new(CountingAccount {
        inner: InMemoryStorageAccount::new(),
        lookups: AtomicUsize::new(0),
    });
    let factory = DefaultQueueFactory::new(account.clone(), true);

    let first = factory.get_queue(&name("orders")).await.unwrap();
    let second = factory.get_queue(&name("orders")).await.unwrap();
    factory.get_queue(&name("audit")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(account.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_create_queue_if_missing_creates_once() {
    let account = InMemoryStorageAccount::new();
    let factory = DefaultQueueFactory::new(Arc::new(account.clone()), true);

    factory.create_queue_if_missing(&name("orders")).await.unwrap();
    factory.create_queue_if_missing(&name("orders")).await.unwrap();

    assert_eq!(account.queue_names(), vec![name("orders")]);
}

#[tokio::test]
async fn test_creation_skipped_when_disabled() {
    let account = InMemoryStorageAccount::new();
    let factory = DefaultQueueFactory::new(Arc::new(account.clone()), false);

    factory.create_queue_if_missing(&name("orders")).await.unwrap();

    assert!(account.queue_names().is_empty());
}

#[tokio::test]
async fn test_creation_failure_names_queue() {
    let factory = DefaultQueueFactory::new(Arc::new(UnavailableAccount), true);

    let result = factory.create_queue_if_missing(&name("orders")).await;

    match result {
        Err(TransportError::QueueCreationFailed { queue_name, source }) => {
            assert_eq!(queue_name, "orders");
            assert!(matches!(source, QueueError::AuthenticationFailed { .. }));
        }
        other => panic!("expected QueueCreationFailed, got {:?}", other.err()),
    }
}
