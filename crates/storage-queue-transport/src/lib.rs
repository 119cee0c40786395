//! # Storage Queue Transport
//!
//! Transport adapter letting a message-bus runtime exchange messages through
//! a cloud storage queue service.
//!
//! This library provides:
//! - Cached queue handles with optional automatic queue creation
//! - A JSON wire codec for message headers and body
//! - Visibility leases with background renewal for long-running handlers
//! - Deletion on completion and immediate redelivery on abort
//! - Batched sends flushed when the unit of work commits
//! - Azure Storage Queues over REST plus an in-memory queue service
//!
//! ## Module Organization
//!
//! - [`transport`] - Send and receive pipelines
//! - [`transaction`] - Unit-of-work callbacks and item storage
//! - [`lease`] - In-flight lease registry and renewer
//! - [`factory`] - Queue handle provider
//! - [`queue`] - Queue service abstraction
//! - [`providers`] - Azure and in-memory queue services
//! - [`codec`] - Wire codec
//! - [`message`] - Message, header and queue name types
//! - [`config`] - Transport options and configuration loading
//! - [`retry`] - Retry policy for queue service calls
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storage_queue_transport::{
//!     AzureStorageAccount, StorageQueueTransport, TransactionScope, TransportOptions,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let account = AzureStorageAccount::from_connection_string("UseDevelopmentStorage=true")?;
//! let transport = StorageQueueTransport::builder()
//!     .storage_account(Arc::new(account))
//!     .input_queue("orders")
//!     .options(TransportOptions::default())
//!     .build()?;
//! transport.initialize().await?;
//!
//! let scope = TransactionScope::new();
//! if let Some(message) = transport.receive(&scope, &CancellationToken::new()).await? {
//!     transport.send("billing", message, &scope)?;
//! }
//! scope.complete().await?;
//! scope.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod factory;
pub mod lease;
pub mod message;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod transaction;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{JsonMessageCodec, MessageCodec};
pub use config::TransportOptions;
pub use error::{
    ConfigurationError, QueueError, SerializationError, TransportError, ValidationError,
};
pub use factory::{DefaultQueueFactory, QueueFactory};
pub use lease::{InFlightLease, LeaseRegistry, LeaseRenewer};
pub use message::{headers, MessageId, PopReceipt, QueueMessage, QueueName, TransportMessage};
pub use providers::{
    AzureStorageAccount, AzureStorageConfig, AzureStorageQueue, InMemoryStorageAccount,
    InMemoryStorageQueue,
};
pub use queue::{EnqueueOptions, StorageAccount, StorageQueue};
pub use retry::RetryPolicy;
pub use transaction::{
    CallbackFuture, ContextItems, ScopeState, TransactionCallback, TransactionContext,
    TransactionScope,
};
pub use transport::{StorageQueueTransport, StorageQueueTransportBuilder};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
