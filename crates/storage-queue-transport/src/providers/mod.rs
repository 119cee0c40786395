//! Queue service provider implementations.
//!
//! - [`InMemoryStorageAccount`]: process-local queues for tests and development
//! - [`AzureStorageAccount`]: Azure Storage Queues over the REST API

pub mod azure;
pub mod memory;

pub use azure::{AzureStorageAccount, AzureStorageConfig, AzureStorageQueue};
pub use memory::{InMemoryStorageAccount, InMemoryStorageQueue};
