//! Tests for lease tracking and renewal.

use super::*;
use crate::error::QueueError;
use crate::message::{QueueMessage, QueueName};
use crate::providers::InMemoryStorageAccount;
use crate::queue::{EnqueueOptions, StorageAccount};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Test Helpers
// ============================================================================

/// Queue whose visibility updates take a while and are counted
struct SlowRenewalQueue {
    name: QueueName,
    delay: Duration,
    renewals: AtomicU32,
}

impl SlowRenewalQueue {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: QueueName::new("slow").unwrap(),
            delay,
            renewals: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl StorageQueue for SlowRenewalQueue {
    fn name(&self) -> &QueueName {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        Ok(true)
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        Ok(false)
    }

    async fn approximate_message_count(&self) -> Result<u64, QueueError> {
        Ok(0)
    }

    async fn send_message(&self, _: &str, _: &EnqueueOptions) -> Result<MessageId, QueueError> {
        Ok(MessageId::new())
    }

    async fn receive_messages(&self, _: u32, _: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        Ok(Vec::new())
    }

    async fn delete_message(&self, _: &MessageId, _: &PopReceipt) -> Result<(), QueueError> {
        Ok(())
    }

    async fn update_visibility(
        &self,
        _: &MessageId,
        _: &PopReceipt,
        _: Duration,
    ) -> Result<PopReceipt, QueueError> {
        tokio::time::sleep(self.delay).await;
        let renewal = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PopReceipt::new(format!("renewed-{}", renewal)))
    }

    async fn clear(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

async fn queue_with_message(
    visibility_timeout: Duration,
) -> (Arc<dyn StorageQueue>, QueueMessage) {
    let account = InMemoryStorageAccount::new();
    let queue = account.queue(&QueueName::new("orders").unwrap());
    queue.create_if_not_exists().await.unwrap();
    queue
        .send_message("payload", &EnqueueOptions::new())
        .await
        .unwrap();
    let message = queue
        .receive_messages(1, visibility_timeout)
        .await
        .unwrap()
        .remove(0);
    (queue, message)
}

// ============================================================================
// Registry Tests
// ============================================================================

mod registry {
    use super::*;

    #[tokio::test]
    async fn test_release_returns_registered_receipt_and_forgets_message() {
        let registry = LeaseRegistry::new();
        let queue = SlowRenewalQueue::new(Duration::ZERO);
        let id = MessageId::new();

        registry.register(queue, id.clone(), PopReceipt::new("r1"), Duration::from_secs(10));

        assert!(registry.contains(&id));
        assert_eq!(registry.release(&id).await, Some(PopReceipt::new("r1")));
        assert!(registry.is_empty());
        assert_eq!(registry.release(&id).await, None);
    }

    #[tokio::test]
    async fn test_register_replaces_existing_record() {
        let registry = LeaseRegistry::new();
        let id = MessageId::new();

        registry.register(
            SlowRenewalQueue::new(Duration::ZERO),
            id.clone(),
            PopReceipt::new("old"),
            Duration::from_secs(10),
        );
        registry.register(
            SlowRenewalQueue::new(Duration::ZERO),
            id.clone(),
            PopReceipt::new("new"),
            Duration::from_secs(10),
        );

        assert_eq!(registry.len(), 1);
        let lease = registry.get(&id).unwrap();
        assert_eq!(lease.message_id(), &id);
        assert_eq!(lease.pop_receipt().await, PopReceipt::new("new"));
    }

    #[tokio::test]
    async fn test_remove_is_synchronous_and_idempotent() {
        let registry = LeaseRegistry::new();
        let id = MessageId::new();
        registry.register(
            SlowRenewalQueue::new(Duration::ZERO),
            id.clone(),
            PopReceipt::new("r"),
            Duration::from_secs(10),
        );

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn test_only_expired_due_times_are_due() {
        let registry = LeaseRegistry::new();
        let soon = MessageId::new();
        let later = MessageId::new();
        registry.register(
            SlowRenewalQueue::new(Duration::ZERO),
            soon.clone(),
            PopReceipt::new("a"),
            Duration::from_millis(10),
        );
        registry.register(
            SlowRenewalQueue::new(Duration::ZERO),
            later,
            PopReceipt::new("b"),
            Duration::from_secs(60),
        );

        let due = registry.due(Instant::now() + Duration::from_millis(20));

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_id(), &soon);
    }

    #[tokio::test]
    async fn test_lease_with_little_time_left_is_due_at_once() {
        let registry = LeaseRegistry::new();
        let id = MessageId::new();

        registry.register_remaining(
            SlowRenewalQueue::new(Duration::ZERO),
            id.clone(),
            PopReceipt::new("r1"),
            Duration::from_secs(10),
            Duration::from_secs(15),
        );

        let due = registry.due(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_id(), &id);
    }

    #[tokio::test]
    async fn test_lease_with_ample_time_left_waits_one_interval() {
        let registry = LeaseRegistry::new();

        registry.register_remaining(
            SlowRenewalQueue::new(Duration::ZERO),
            MessageId::new(),
            PopReceipt::new("r1"),
            Duration::from_secs(10),
            Duration::from_secs(60),
        );

        assert!(registry.due(Instant::now()).is_empty());
        assert_eq!(registry.due(Instant::now() + Duration::from_secs(10)).len(), 1);
    }

    #[tokio::test]
    async fn test_removed_lease_is_skipped_by_pending_renewal() {
        let queue = SlowRenewalQueue::new(Duration::ZERO);
        let registry = LeaseRegistry::new();
        let id = MessageId::new();
        registry.register(queue.clone(), id.clone(), PopReceipt::new("r1"), Duration::ZERO);
        let pending = registry.get(&id).unwrap();

        assert!(registry.remove(&id));
        pending.renew(Duration::from_secs(30)).await;

        assert!(pending.is_released());
        assert_eq!(queue.renewals.load(Ordering::SeqCst), 0);
        assert_eq!(pending.pop_receipt().await, PopReceipt::new("r1"));
    }
}

// ============================================================================
// Renewer Tests
// ============================================================================

mod renewer {
    use super::*;

    #[tokio::test]
    async fn test_renewal_keeps_message_hidden_past_visibility_timeout() {
        let visibility = Duration::from_millis(300);
        let interval = Duration::from_millis(50);
        let (queue, message) = queue_with_message(visibility).await;
        let registry = LeaseRegistry::new();
        registry.register(
            Arc::clone(&queue),
            message.message_id.clone(),
            message.pop_receipt.clone(),
            interval,
        );
        let renewer = LeaseRenewer::new(registry.clone(), visibility, interval);

        renewer.start();
        tokio::time::sleep(Duration::from_millis(700)).await;

        let competing = queue.receive_messages(1, visibility).await.unwrap();
        assert!(competing.is_empty(), "renewed message must stay hidden");

        let newest = registry.release(&message.message_id).await.unwrap();
        renewer.stop().await;

        assert_ne!(newest, message.pop_receipt);
        queue
            .delete_message(&message.message_id, &newest)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unrenewed_message_becomes_visible_again() {
        let visibility = Duration::from_millis(100);
        let (queue, _message) = queue_with_message(visibility).await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(queue.receive_messages(1, visibility).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_waits_for_renewal_in_flight() {
        let queue = SlowRenewalQueue::new(Duration::from_millis(150));
        let registry = LeaseRegistry::new();
        let id = MessageId::new();
        registry.register(
            queue.clone(),
            id.clone(),
            PopReceipt::new("original"),
            Duration::from_millis(10),
        );
        let renewer = LeaseRenewer::new(
            registry.clone(),
            Duration::from_secs(30),
            Duration::from_millis(10),
        );

        renewer.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let receipt = registry.release(&id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        renewer.stop().await;

        assert_eq!(receipt, Some(PopReceipt::new("renewed-1")));
        assert_eq!(queue.renewals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renewal_failure_is_tolerated() {
        let visibility = Duration::from_millis(300);
        let interval = Duration::from_millis(20);
        let (queue, message) = queue_with_message(visibility).await;
        let registry = LeaseRegistry::new();
        registry.register(
            Arc::clone(&queue),
            message.message_id.clone(),
            message.pop_receipt.clone(),
            interval,
        );
        queue
            .delete_message(&message.message_id, &message.pop_receipt)
            .await
            .unwrap();
        let renewer = LeaseRenewer::new(registry.clone(), visibility, interval);

        renewer.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(renewer.is_running());
        assert_eq!(
            registry.release(&message.message_id).await,
            Some(message.pop_receipt.clone())
        );
        renewer.stop().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let renewer = LeaseRenewer::new(
            LeaseRegistry::new(),
            Duration::from_secs(30),
            Duration::from_secs(10),
        );

        assert!(!renewer.is_running());
        renewer.start();
        renewer.start();
        assert!(renewer.is_running());

        renewer.stop().await;
        renewer.stop().await;
        assert!(!renewer.is_running());
    }

    #[tokio::test]
    async fn test_released_lease_is_not_renewed() {
        let queue = SlowRenewalQueue::new(Duration::ZERO);
        let registry = LeaseRegistry::new();
        let id = MessageId::new();
        registry.register(
            queue.clone(),
            id.clone(),
            PopReceipt::new("r"),
            Duration::from_millis(10),
        );
        let renewer = LeaseRenewer::new(
            registry.clone(),
            Duration::from_secs(30),
            Duration::from_millis(10),
        );

        registry.release(&id).await;
        renewer.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        renewer.stop().await;

        assert_eq!(queue.renewals.load(Ordering::SeqCst), 0);
    }
}
