//! Integration tests for purging the input queue at start-up

mod common;

use common::{endpoint, message_count, order_message, process_next, send_committed, Processed};
use storage_queue_transport::{InMemoryStorageAccount, TransportOptions};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_purge_discards_backlog() {
    // Arrange
    let account = InMemoryStorageAccount::new();
    let orders = endpoint(&account, "orders", TransportOptions::default()).await;
    let backlog = (0..5).map(|i| order_message(&format!("order-{}", i))).collect();
    send_committed(&orders, "orders", backlog).await;

    // Act
    assert_ok!(orders.purge_input_queue().await);
    let next = process_next(&orders, |_message, _scope| async { Ok(()) })
        .await
        .unwrap();

    // Assert
    assert_eq!(next, Processed::Empty);
    assert_eq!(message_count(&account, "orders").await, 0);
}

#[tokio::test]
async fn test_purge_leaves_missing_queue_missing() {
    // Arrange
    let account = InMemoryStorageAccount::new();
    let orders = endpoint(
        &account,
        "orders",
        TransportOptions {
            automatically_create_queues: false,
            ..TransportOptions::default()
        },
    )
    .await;

    // Act
    assert_ok!(orders.purge_input_queue().await);

    // Assert
    assert!(account.queue_names().is_empty());
}
