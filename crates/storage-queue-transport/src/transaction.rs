//! Unit-of-work contract the transport registers its hooks against.
//!
//! The message-bus runtime wraps every receive and every group of sends in a
//! unit of work. The transport only needs two capabilities from it:
//!
//! - typed per-unit-of-work storage ([`ContextItems::get_or_add`]), used to
//!   hold the outgoing batch
//! - callback registration for the commit decision, full completion, abort
//!   and disposal
//!
//! [`TransactionScope`] is a ready-made implementation for hosts that do not
//! bring their own.

use crate::error::{ConfigurationError, TransportError};
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

/// Future returned by a unit-of-work callback
pub type CallbackFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Callback invoked once by the unit of work, receiving its item storage
pub type TransactionCallback = Box<dyn FnOnce(Arc<ContextItems>) -> CallbackFuture + Send>;

// ============================================================================
// Context Items
// ============================================================================

/// Typed key/value storage scoped to one unit of work
#[derive(Default)]
pub struct ContextItems {
    items: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl ContextItems {
    /// Create an empty item bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the item stored under `key`, if it exists and has type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items
            .get(key)
            .cloned()
            .and_then(|item| item.downcast::<T>().ok())
    }

    /// Get the item stored under `key`, creating it with `factory` when absent
    ///
    /// Fails if an item of a different type is already stored under `key`.
    pub fn get_or_add<T, F>(&self, key: &str, factory: F) -> Result<Arc<T>, TransportError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let item = items
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(factory()) as Arc<dyn Any + Send + Sync>)
            .clone();

        item.downcast::<T>().map_err(|_| {
            TransportError::Configuration(ConfigurationError::Invalid {
                message: format!(
                    "unit-of-work item '{}' is not a {}",
                    key,
                    std::any::type_name::<T>()
                ),
            })
        })
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no item is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContextItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ContextItems")
            .field("keys", &items.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Transaction Context
// ============================================================================

/// Unit of work driven by the message-bus runtime
///
/// Each registered callback runs at most once. `on_committed` callbacks run
/// once the unit of work decides to commit, `on_completed` after every
/// committed callback succeeded, `on_aborted` when the unit of work is rolled
/// back and `on_disposed` unconditionally at the end.
pub trait TransactionContext: Send + Sync {
    /// Item storage of this unit of work
    fn items(&self) -> Arc<ContextItems>;

    fn on_committed(&self, callback: TransactionCallback);

    fn on_completed(&self, callback: TransactionCallback);

    fn on_aborted(&self, callback: TransactionCallback);

    fn on_disposed(&self, callback: TransactionCallback);
}

// ============================================================================
// Transaction Scope
// ============================================================================

/// Lifecycle state of a [`TransactionScope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Pending,
    Completed,
    Aborted,
    Disposed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Disposed => "disposed",
        };
        write!(f, "{}", state)
    }
}

#[derive(Default)]
struct Callbacks {
    committed: Vec<TransactionCallback>,
    completed: Vec<TransactionCallback>,
    aborted: Vec<TransactionCallback>,
    disposed: Vec<TransactionCallback>,
}

struct ScopeInner {
    state: ScopeState,
    callbacks: Callbacks,
}

/// In-process unit of work
///
/// `complete()` runs the committed callbacks in registration order and then
/// the completed callbacks. If a committed callback fails the scope aborts
/// instead and the failure is returned. `dispose()` must be called exactly
/// once when the unit of work ends; disposing a pending scope aborts it first.
pub struct TransactionScope {
    items: Arc<ContextItems>,
    inner: Mutex<ScopeInner>,
}

impl Default for TransactionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionScope {
    /// Create an open scope
    pub fn new() -> Self {
        Self {
            items: Arc::new(ContextItems::new()),
            inner: Mutex::new(ScopeInner {
                state: ScopeState::Pending,
                callbacks: Callbacks::default(),
            }),
        }
    }

    /// Current state of the scope
    pub fn state(&self) -> ScopeState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScopeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave `Pending` for `next`, handing out the callbacks that may now run
    fn transition(&self, next: ScopeState) -> Result<Callbacks, TransportError> {
        let mut inner = self.lock();
        if inner.state != ScopeState::Pending {
            return Err(TransportError::TransactionFinished {
                state: inner.state.to_string(),
            });
        }
        inner.state = next;
        Ok(std::mem::take(&mut inner.callbacks))
    }

    fn register(
        &self,
        select: impl FnOnce(&mut Callbacks) -> &mut Vec<TransactionCallback>,
        callback: TransactionCallback,
    ) {
        let mut inner = self.lock();
        select(&mut inner.callbacks).push(callback);
    }

    /// Commit the unit of work
    pub async fn complete(&self) -> Result<(), TransportError> {
        let callbacks = self.transition(ScopeState::Completed)?;

        for callback in callbacks.committed {
            if let Err(e) = callback(Arc::clone(&self.items)).await {
                warn!(error = %e, "Commit callback failed, aborting unit of work");
                self.lock().state = ScopeState::Aborted;
                self.run_aborted(callbacks.aborted).await;
                self.keep_disposed(callbacks.disposed);
                return Err(e);
            }
        }

        let mut first_error = None;
        for callback in callbacks.completed {
            if let Err(e) = callback(Arc::clone(&self.items)).await {
                if first_error.is_some() {
                    warn!(error = %e, "Additional completion callback failed");
                } else {
                    first_error = Some(e);
                }
            }
        }

        self.keep_disposed(callbacks.disposed);
        first_error.map_or(Ok(()), Err)
    }

    /// Roll back the unit of work
    pub async fn abort(&self) -> Result<(), TransportError> {
        let callbacks = self.transition(ScopeState::Aborted)?;
        self.run_aborted(callbacks.aborted).await;
        self.keep_disposed(callbacks.disposed);
        Ok(())
    }

    /// End the unit of work, running the disposal callbacks once
    pub async fn dispose(&self) {
        if self.state() == ScopeState::Pending {
            // A concurrent complete/abort may win; either way the scope is finished.
            let _ = self.abort().await;
        }

        let disposed = {
            let mut inner = self.lock();
            if inner.state == ScopeState::Disposed {
                return;
            }
            inner.state = ScopeState::Disposed;
            std::mem::take(&mut inner.callbacks.disposed)
        };

        for callback in disposed {
            if let Err(e) = callback(Arc::clone(&self.items)).await {
                debug!(error = %e, "Dispose callback failed");
            }
        }
    }

    async fn run_aborted(&self, aborted: Vec<TransactionCallback>) {
        for callback in aborted {
            if let Err(e) = callback(Arc::clone(&self.items)).await {
                debug!(error = %e, "Abort callback failed");
            }
        }
    }

    /// Put disposal callbacks back so `dispose()` can run them
    fn keep_disposed(&self, disposed: Vec<TransactionCallback>) {
        let mut inner = self.lock();
        let registered_later = std::mem::replace(&mut inner.callbacks.disposed, disposed);
        inner.callbacks.disposed.extend(registered_later);
    }
}

impl TransactionContext for TransactionScope {
    fn items(&self) -> Arc<ContextItems> {
        Arc::clone(&self.items)
    }

    fn on_committed(&self, callback: TransactionCallback) {
        self.register(|c| &mut c.committed, callback);
    }

    fn on_completed(&self, callback: TransactionCallback) {
        self.register(|c| &mut c.completed, callback);
    }

    fn on_aborted(&self, callback: TransactionCallback) {
        self.register(|c| &mut c.aborted, callback);
    }

    fn on_disposed(&self, callback: TransactionCallback) {
        self.register(|c| &mut c.disposed, callback);
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("state", &self.state())
            .field("items", &self.items)
            .finish()
    }
}
