//! Common test utilities for storage queue transport integration tests
//!
//! This module provides:
//! - Endpoint builders over a shared in-memory storage account
//! - Message builders
//! - A handler-style receive/process/commit loop body

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storage_queue_transport::{
    headers, InMemoryStorageAccount, QueueName, StorageAccount, StorageQueueTransport,
    TransactionScope, TransportError, TransportMessage, TransportOptions,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Endpoints
// ============================================================================

/// Build and initialize an endpoint receiving from `input_queue`
#[allow(dead_code)]
pub async fn endpoint(
    account: &InMemoryStorageAccount,
    input_queue: &str,
    options: TransportOptions,
) -> StorageQueueTransport {
    let transport = StorageQueueTransport::builder()
        .storage_account(Arc::new(account.clone()))
        .input_queue(input_queue)
        .options(options)
        .build()
        .expect("endpoint should build");
    transport
        .initialize()
        .await
        .expect("endpoint should initialize");
    transport
}

/// Options with lease renewal switched on
#[allow(dead_code)]
pub fn renewing_options(visibility_timeout: Duration, interval: Duration) -> TransportOptions {
    TransportOptions {
        automatic_lease_renewal: true,
        visibility_timeout,
        lease_renewal_interval: interval,
        ..TransportOptions::default()
    }
}

// ============================================================================
// Messages
// ============================================================================

#[allow(dead_code)]
pub fn order_message(order_id: &str) -> TransportMessage {
    TransportMessage::new(HashMap::new(), format!("{{\"order\":\"{}\"}}", order_id))
        .with_header(headers::MESSAGE_ID, order_id)
        .with_header("x-message-type", "OrderPlaced")
}

/// Send messages to `destination` in one committed unit of work
#[allow(dead_code)]
pub async fn send_committed(
    transport: &StorageQueueTransport,
    destination: &str,
    messages: Vec<TransportMessage>,
) {
    let scope = TransactionScope::new();
    for message in messages {
        transport
            .send(destination, message, &scope)
            .expect("send should buffer");
    }
    scope.complete().await.expect("commit should succeed");
    scope.dispose().await;
}

#[allow(dead_code)]
pub async fn message_count(account: &InMemoryStorageAccount, queue: &str) -> u64 {
    account
        .queue(&QueueName::new(queue).unwrap())
        .approximate_message_count()
        .await
        .unwrap()
}

// ============================================================================
// Processing
// ============================================================================

/// Outcome of one pass through [`process_next`]
#[allow(dead_code)]
#[derive(Debug, PartialEq, Eq)]
pub enum Processed {
    Empty,
    Completed(String),
    Aborted(String),
}

/// Receive one message and run `handler` inside its unit of work
///
/// The unit of work commits when the handler succeeds and aborts otherwise.
#[allow(dead_code)]
pub async fn process_next<F, Fut>(
    transport: &StorageQueueTransport,
    handler: F,
) -> Result<Processed, TransportError>
where
    F: FnOnce(TransportMessage, Arc<TransactionScope>) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let scope = Arc::new(TransactionScope::new());
    let message = match transport
        .receive(scope.as_ref(), &CancellationToken::new())
        .await?
    {
        Some(message) => message,
        None => return Ok(Processed::Empty),
    };
    let message_id = message.message_id_or_unknown();

    let outcome = match handler(message, Arc::clone(&scope)).await {
        Ok(()) => scope
            .complete()
            .await
            .map(|()| Processed::Completed(message_id)),
        Err(_) => scope.abort().await.map(|()| Processed::Aborted(message_id)),
    };
    scope.dispose().await;
    outcome
}
