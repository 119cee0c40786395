//! In-flight lease tracking and background lease renewal.
//!
//! A message fetched from the queue is only hidden for the visibility
//! timeout. While the consumer is still working on it, the [`LeaseRenewer`]
//! keeps extending that timeout. Every extension issues a new pop receipt,
//! and deleting the message needs the newest one, so each lease record guards
//! its receipt with an async mutex: [`LeaseRegistry::release`] waits for a
//! renewal that is in flight and then hands back the receipt it produced.

use crate::message::{MessageId, PopReceipt};
use crate::queue::StorageQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;

// ============================================================================
// Lease Records
// ============================================================================

#[derive(Debug)]
struct LeaseState {
    pop_receipt: PopReceipt,
    next_renewal_due: Instant,
}

/// Lease held on one fetched message
pub struct InFlightLease {
    message_id: MessageId,
    queue: Arc<dyn StorageQueue>,
    renewal_interval: Duration,
    released: AtomicBool,
    state: AsyncMutex<LeaseState>,
}

impl InFlightLease {
    /// ID of the leased message
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Most recent pop receipt, waiting for an in-flight renewal
    pub async fn pop_receipt(&self) -> PopReceipt {
        self.state.lock().await.pop_receipt.clone()
    }

    /// Whether the renewer should pick this lease up at `now`
    ///
    /// A lease that is locked is being renewed or released and is never due.
    fn is_due(&self, now: Instant) -> bool {
        match self.state.try_lock() {
            Ok(state) => !self.is_released() && state.next_renewal_due <= now,
            Err(_) => false,
        }
    }

    /// Whether the lease was released or abandoned
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    async fn renew(&self, visibility_timeout: Duration) {
        let mut state = self.state.lock().await;
        if self.is_released() || state.next_renewal_due > Instant::now() {
            return;
        }

        match self
            .queue
            .update_visibility(&self.message_id, &state.pop_receipt, visibility_timeout)
            .await
        {
            Ok(pop_receipt) => {
                state.pop_receipt = pop_receipt;
                state.next_renewal_due = Instant::now() + self.renewal_interval;
                debug!(
                    message_id = %self.message_id,
                    queue_name = %self.queue.name(),
                    "Lease renewed"
                );
            }
            Err(e) => {
                // Still due, so the next tick tries again until the lease lapses.
                warn!(
                    message_id = %self.message_id,
                    queue_name = %self.queue.name(),
                    error = %e,
                    "Lease renewal failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for InFlightLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightLease")
            .field("message_id", &self.message_id)
            .field("queue", &self.queue.name())
            .finish()
    }
}

/// Concurrent registry of leases, at most one per message ID
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    leases: Arc<DashMap<MessageId, Arc<InFlightLease>>>,
}

impl LeaseRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly fetched message; first renewal is due after `renewal_interval`
    pub fn register(
        &self,
        queue: Arc<dyn StorageQueue>,
        message_id: MessageId,
        pop_receipt: PopReceipt,
        renewal_interval: Duration,
    ) {
        self.insert(
            queue,
            message_id,
            pop_receipt,
            renewal_interval,
            Instant::now() + renewal_interval,
        );
    }

    /// Track a message whose lease runs out after `remaining`
    ///
    /// The renewer only looks at leases once per `renewal_interval`, so the
    /// first renewal is brought forward to at least two intervals before the
    /// lease runs out. A message taken from the prefetch buffer late in its
    /// visibility window is therefore renewed on the next tick.
    pub fn register_remaining(
        &self,
        queue: Arc<dyn StorageQueue>,
        message_id: MessageId,
        pop_receipt: PopReceipt,
        renewal_interval: Duration,
        remaining: Duration,
    ) {
        let first_due = renewal_interval.min(remaining.saturating_sub(renewal_interval * 2));
        self.insert(
            queue,
            message_id,
            pop_receipt,
            renewal_interval,
            Instant::now() + first_due,
        );
    }

    fn insert(
        &self,
        queue: Arc<dyn StorageQueue>,
        message_id: MessageId,
        pop_receipt: PopReceipt,
        renewal_interval: Duration,
        next_renewal_due: Instant,
    ) {
        let lease = Arc::new(InFlightLease {
            message_id: message_id.clone(),
            queue,
            renewal_interval,
            released: AtomicBool::new(false),
            state: AsyncMutex::new(LeaseState {
                pop_receipt,
                next_renewal_due,
            }),
        });
        if let Some(previous) = self.leases.insert(message_id, lease) {
            previous.mark_released();
        }
    }

    /// Stop tracking a message and return its newest pop receipt
    ///
    /// Waits for a renewal of the message that is already running.
    pub async fn release(&self, message_id: &MessageId) -> Option<PopReceipt> {
        let (_, lease) = self.leases.remove(message_id)?;
        lease.mark_released();
        let state = lease.state.lock().await;
        Some(state.pop_receipt.clone())
    }

    /// Stop tracking a message without waiting; returns whether it was tracked
    ///
    /// Renewals of the message that have not started yet are skipped.
    pub fn remove(&self, message_id: &MessageId) -> bool {
        match self.leases.remove(message_id) {
            Some((_, lease)) => {
                lease.mark_released();
                true
            }
            None => false,
        }
    }

    /// Lease of a tracked message
    pub fn get(&self, message_id: &MessageId) -> Option<Arc<InFlightLease>> {
        self.leases.get(message_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a message is tracked
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.leases.contains_key(message_id)
    }

    /// Number of tracked messages
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether no message is tracked
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn due(&self, now: Instant) -> Vec<Arc<InFlightLease>> {
        self.leases
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

// ============================================================================
// Lease Renewer
// ============================================================================

struct RunningRenewer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Background task extending the leases of due messages on a fixed tick
pub struct LeaseRenewer {
    registry: LeaseRegistry,
    visibility_timeout: Duration,
    interval: Duration,
    running: Mutex<Option<RunningRenewer>>,
}

impl LeaseRenewer {
    /// Each renewal extends a lease by `visibility_timeout`; the timer ticks every `interval`
    pub fn new(registry: LeaseRegistry, visibility_timeout: Duration, interval: Duration) -> Self {
        Self {
            registry,
            visibility_timeout,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Whether the renewal task is running
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the timer; does nothing when already running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_renewals(
            self.registry.clone(),
            self.visibility_timeout,
            self.interval,
            cancel.clone(),
        ));

        info!(
            interval_ms = self.interval.as_millis() as u64,
            visibility_timeout_ms = self.visibility_timeout.as_millis() as u64,
            "Lease renewer started"
        );
        *running = Some(RunningRenewer { cancel, task });
    }

    /// Stop the timer and wait for renewals already in flight
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                warn!(error = %e, "Lease renewer task ended abnormally");
            }
            info!("Lease renewer stopped");
        }
    }
}

impl Drop for LeaseRenewer {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            running.cancel.cancel();
        }
    }
}

async fn run_renewals(
    registry: LeaseRegistry,
    visibility_timeout: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut renewals = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for lease in registry.due(Instant::now()) {
                    renewals.spawn(async move { lease.renew(visibility_timeout).await });
                }
            }
            Some(result) = renewals.join_next(), if !renewals.is_empty() => {
                if let Err(e) = result {
                    warn!(error = %e, "Lease renewal task failed");
                }
            }
        }
    }

    while let Some(result) = renewals.join_next().await {
        if let Err(e) = result {
            warn!(error = %e, "Lease renewal task failed");
        }
    }
}
