//! Transport adapter between the message-bus runtime and the queue service.
//!
//! # Receiving
//!
//! [`StorageQueueTransport::receive`] fetches one message (or a prefetched
//! batch) from the input queue under a visibility lease and registers hooks on
//! the caller's unit of work:
//!
//! - on completion the message is deleted with its newest pop receipt
//! - on abort its visibility is reset to zero so it is redelivered at once
//! - on disposal its lease record is dropped
//!
//! # Sending
//!
//! [`StorageQueueTransport::send`] only buffers. The first send in a unit of
//! work registers a commit callback that flushes the whole batch, grouped by
//! destination, with all sends running concurrently.

use crate::clock::{Clock, SystemClock};
use crate::codec::{JsonMessageCodec, MessageCodec};
use crate::config::TransportOptions;
use crate::error::{ConfigurationError, QueueError, TransportError};
use crate::factory::{DefaultQueueFactory, QueueFactory};
use crate::lease::{LeaseRegistry, LeaseRenewer};
use crate::message::{
    headers, parse_time_span, parse_timestamp, MessageId, PopReceipt, QueueMessage, QueueName,
    TransportMessage,
};
use crate::queue::{EnqueueOptions, StorageAccount, StorageQueue};
use crate::transaction::{ContextItems, TransactionContext};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Unit-of-work item key of the outgoing batch
const OUTGOING_BATCH_KEY: &str = "storage-queue-transport.outgoing-batch";

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`StorageQueueTransport`]
#[derive(Default)]
pub struct StorageQueueTransportBuilder {
    queue_factory: Option<Arc<dyn QueueFactory>>,
    storage_account: Option<Arc<dyn StorageAccount>>,
    input_queue: Option<String>,
    options: TransportOptions,
    codec: Option<Arc<dyn MessageCodec>>,
    clock: Option<Arc<dyn Clock>>,
}

impl StorageQueueTransportBuilder {
    /// Resolve queues through a custom factory
    pub fn queue_factory(mut self, factory: Arc<dyn QueueFactory>) -> Self {
        self.queue_factory = Some(factory);
        self
    }

    /// Resolve queues through a [`DefaultQueueFactory`] over this account
    pub fn storage_account(mut self, account: Arc<dyn StorageAccount>) -> Self {
        self.storage_account = Some(account);
        self
    }

    /// Queue to receive from; without one the transport is send-only
    pub fn input_queue(mut self, name: impl Into<String>) -> Self {
        self.input_queue = Some(name.into());
        self
    }

    /// Transport options; validated by [`build`](Self::build)
    pub fn options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Wire codec; defaults to [`JsonMessageCodec`]
    pub fn codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Clock used for deferral and lease timing; defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and create the transport
    pub fn build(self) -> Result<StorageQueueTransport, TransportError> {
        self.options.validate()?;

        let factory: Arc<dyn QueueFactory> = match (self.queue_factory, self.storage_account) {
            (Some(factory), _) => factory,
            (None, Some(account)) => Arc::new(DefaultQueueFactory::new(
                account,
                self.options.automatically_create_queues,
            )),
            (None, None) => {
                return Err(ConfigurationError::Missing {
                    key: "queue_factory".to_string(),
                }
                .into())
            }
        };

        let input_queue = self
            .input_queue
            .map(|name| QueueName::parse(&name, self.options.validate_queue_names))
            .transpose()?;

        let leases = LeaseRegistry::new();
        let renewer = (self.options.automatic_lease_renewal && input_queue.is_some()).then(|| {
            LeaseRenewer::new(
                leases.clone(),
                self.options.visibility_timeout,
                self.options.lease_renewal_interval,
            )
        });

        let dispatcher = SendDispatcher {
            factory: Arc::clone(&factory),
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonMessageCodec::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            use_native_deferred_messages: self.options.use_native_deferred_messages,
        };

        Ok(StorageQueueTransport {
            factory,
            input_queue,
            options: self.options,
            dispatcher,
            leases,
            renewer,
            prefetched: AsyncMutex::new(VecDeque::new()),
        })
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Queue-backed transport for one endpoint
pub struct StorageQueueTransport {
    factory: Arc<dyn QueueFactory>,
    input_queue: Option<QueueName>,
    options: TransportOptions,
    dispatcher: SendDispatcher,
    leases: LeaseRegistry,
    renewer: Option<LeaseRenewer>,
    prefetched: AsyncMutex<VecDeque<QueueMessage>>,
}

impl StorageQueueTransport {
    /// Start configuring a transport
    pub fn builder() -> StorageQueueTransportBuilder {
        StorageQueueTransportBuilder::default()
    }

    /// Input queue of this transport; `None` for a send-only transport
    pub fn address(&self) -> Option<&QueueName> {
        self.input_queue.as_ref()
    }

    /// Options the transport was built with
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Leases of messages currently being processed
    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    /// Create the input queue and start lease renewal when enabled
    pub async fn initialize(&self) -> Result<(), TransportError> {
        if let Some(input_queue) = &self.input_queue {
            self.factory.create_queue_if_missing(input_queue).await?;
        }

        if let Some(renewer) = &self.renewer {
            renewer.start();
        }

        info!(
            input_queue = self.input_queue.as_ref().map(QueueName::as_str),
            prefetch_count = self.options.prefetch_count,
            automatic_lease_renewal = self.renewer.is_some(),
            "Transport initialized"
        );
        Ok(())
    }

    /// Make sure a queue exists, e.g. a destination this endpoint sends to
    pub async fn create_queue(&self, address: &str) -> Result<(), TransportError> {
        let name = self.queue_name(address)?;
        self.factory.create_queue_if_missing(&name).await
    }

    /// Stop lease renewal and hand back prefetched messages
    pub async fn shutdown(&self) {
        if let Some(renewer) = &self.renewer {
            renewer.stop().await;
        }

        let buffered: Vec<QueueMessage> = self.prefetched.lock().await.drain(..).collect();
        if buffered.is_empty() {
            return;
        }

        if let Some(input_queue) = &self.input_queue {
            if let Ok(queue) = self.factory.get_queue(input_queue).await {
                join_all(buffered.iter().map(|message| {
                    reset_visibility(queue.as_ref(), message.message_id.clone(), message.pop_receipt.clone())
                }))
                .await;
            }
        }
    }

    fn queue_name(&self, name: &str) -> Result<QueueName, TransportError> {
        Ok(QueueName::parse(name, self.options.validate_queue_names)?)
    }

    fn require_input_queue(&self) -> Result<&QueueName, TransportError> {
        self.input_queue.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid {
                message: "transport has no input queue (send-only)".to_string(),
            }
            .into()
        })
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Buffer a message for `destination`; it is sent when the unit of work commits
    pub fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &dyn TransactionContext,
    ) -> Result<(), TransportError> {
        let destination = self.queue_name(destination)?;

        let mut first_send = false;
        let batch = context.items().get_or_add(OUTGOING_BATCH_KEY, || {
            first_send = true;
            OutgoingBatch::default()
        })?;

        if first_send {
            let dispatcher = self.dispatcher.clone();
            let pending = Arc::clone(&batch);
            context.on_committed(Box::new(move |_items: Arc<ContextItems>| {
                async move { dispatcher.flush(pending.take()).await }.boxed()
            }));
        }

        debug!(
            message_id = %message.message_id_or_unknown(),
            destination = %destination,
            "Message buffered for commit"
        );
        batch.push(destination, message);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------------

    /// Receive the next message, or `None` when the queue is empty or `cancellation` fires
    pub async fn receive(
        &self,
        context: &dyn TransactionContext,
        cancellation: &CancellationToken,
    ) -> Result<Option<TransportMessage>, TransportError> {
        let input_queue = self.require_input_queue()?;
        let queue = self.factory.get_queue(input_queue).await?;

        let message = match self.next_message(&queue, cancellation).await? {
            Some(message) => message,
            None => return Ok(None),
        };

        if self.renewer.is_some() {
            self.leases.register_remaining(
                Arc::clone(&queue),
                message.message_id.clone(),
                message.pop_receipt.clone(),
                self.options.lease_renewal_interval,
                self.remaining_lease(&message),
            );
        }

        self.register_hooks(context, queue, &message);

        debug!(
            message_id = %message.message_id,
            queue_name = %input_queue,
            dequeue_count = message.dequeue_count,
            "Message received"
        );

        Ok(Some(self.dispatcher.codec.decode(&message.text)?))
    }

    async fn next_message(
        &self,
        queue: &Arc<dyn StorageQueue>,
        cancellation: &CancellationToken,
    ) -> Result<Option<QueueMessage>, TransportError> {
        let prefetch_count = match self.options.prefetch_count {
            Some(count) => count,
            None => return Ok(self.fetch(queue, 1, cancellation).await?.into_iter().next()),
        };

        let mut buffer = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(queue_name = %queue.name(), "Receive cancelled");
                return Ok(None);
            }
            buffer = self.prefetched.lock() => buffer,
        };
        if let Some(message) = self.pop_leased(&mut buffer) {
            return Ok(Some(message));
        }

        buffer.extend(self.fetch(queue, prefetch_count, cancellation).await?);
        Ok(self.pop_leased(&mut buffer))
    }

    /// Pop the first buffered message whose lease is still usable
    ///
    /// With lease renewal on, a message needs more than one renewal interval
    /// left, otherwise it may lapse before the renewer gets to it.
    fn pop_leased(&self, buffer: &mut VecDeque<QueueMessage>) -> Option<QueueMessage> {
        let minimum = match self.renewer {
            Some(_) => self.options.lease_renewal_interval,
            None => Duration::ZERO,
        };
        while let Some(message) = buffer.pop_front() {
            let remaining = self.remaining_lease(&message);
            if !remaining.is_zero() && remaining > minimum {
                return Some(message);
            }
            debug!(
                message_id = %message.message_id,
                remaining_ms = remaining.as_millis() as u64,
                "Dropping prefetched message whose lease is about to lapse"
            );
        }
        None
    }

    /// Time until the message becomes visible to other consumers again
    fn remaining_lease(&self, message: &QueueMessage) -> Duration {
        (message.next_visible_at - self.dispatcher.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    async fn fetch(
        &self,
        queue: &Arc<dyn StorageQueue>,
        max_messages: u32,
        cancellation: &CancellationToken,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(queue_name = %queue.name(), "Receive cancelled");
                return Ok(Vec::new());
            }
            result = queue.receive_messages(max_messages, self.options.visibility_timeout) => result,
        };

        match result {
            Ok(messages) => Ok(messages),
            Err(QueueError::Cancelled) => {
                debug!(queue_name = %queue.name(), "Receive cancelled by queue client");
                Ok(Vec::new())
            }
            Err(e) => Err(TransportError::ReceiveFailed {
                queue_name: queue.name().to_string(),
                source: e,
            }),
        }
    }

    fn register_hooks(
        &self,
        context: &dyn TransactionContext,
        queue: Arc<dyn StorageQueue>,
        message: &QueueMessage,
    ) {
        let completion = ReceivedLease {
            queue,
            leases: self.leases.clone(),
            message_id: message.message_id.clone(),
            pop_receipt: message.pop_receipt.clone(),
        };
        let abort = completion.clone();
        let dispose = completion.clone();

        context.on_completed(Box::new(move |_items: Arc<ContextItems>| {
            completion.complete().boxed()
        }));
        context.on_aborted(Box::new(move |_items: Arc<ContextItems>| abort.abort().boxed()));
        context.on_disposed(Box::new(move |_items: Arc<ContextItems>| {
            dispose.leases.remove(&dispose.message_id);
            futures::future::ready(Ok::<(), TransportError>(())).boxed()
        }));
    }

    // ------------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------------

    /// Delete every message in the input queue; a missing queue is left alone
    pub async fn purge_input_queue(&self) -> Result<(), TransportError> {
        let input_queue = self.require_input_queue()?;
        let queue = self.factory.get_queue(input_queue).await?;
        let purge_failed = |e| TransportError::PurgeFailed {
            queue_name: input_queue.to_string(),
            source: e,
        };

        if !queue.exists().await.map_err(purge_failed)? {
            debug!(queue_name = %input_queue, "Input queue does not exist, nothing to purge");
            return Ok(());
        }

        match queue.clear().await {
            Ok(()) | Err(QueueError::QueueNotFound { .. }) => {
                info!(queue_name = %input_queue, "Input queue purged");
                Ok(())
            }
            Err(e) => Err(purge_failed(e)),
        }
    }
}

// ============================================================================
// Receive Hooks
// ============================================================================

/// Everything the unit-of-work hooks of one received message need
#[derive(Clone)]
struct ReceivedLease {
    queue: Arc<dyn StorageQueue>,
    leases: LeaseRegistry,
    message_id: MessageId,
    pop_receipt: PopReceipt,
}

impl ReceivedLease {
    async fn complete(self) -> Result<(), TransportError> {
        let pop_receipt = self
            .leases
            .release(&self.message_id)
            .await
            .unwrap_or(self.pop_receipt);

        self.queue
            .delete_message(&self.message_id, &pop_receipt)
            .await
            .map_err(|e| TransportError::CompleteFailed {
                message_id: self.message_id.to_string(),
                pop_receipt: pop_receipt.to_string(),
                source: e,
            })?;

        debug!(
            message_id = %self.message_id,
            queue_name = %self.queue.name(),
            "Message completed"
        );
        Ok(())
    }

    async fn abort(self) -> Result<(), TransportError> {
        let pop_receipt = self
            .leases
            .release(&self.message_id)
            .await
            .unwrap_or(self.pop_receipt);

        reset_visibility(self.queue.as_ref(), self.message_id, pop_receipt).await;
        Ok(())
    }
}

/// Make a leased message visible again; failures are only logged
async fn reset_visibility(
    queue: &dyn StorageQueue,
    message_id: MessageId,
    pop_receipt: PopReceipt,
) {
    match queue
        .update_visibility(&message_id, &pop_receipt, Duration::ZERO)
        .await
    {
        Ok(_) => debug!(message_id = %message_id, queue_name = %queue.name(), "Message released for redelivery"),
        Err(e) => debug!(
            message_id = %message_id,
            queue_name = %queue.name(),
            error = %e,
            "Could not release message, it becomes visible when its lease lapses"
        ),
    }
}

// ============================================================================
// Send Pipeline
// ============================================================================

/// Messages sent within one unit of work
#[derive(Default)]
struct OutgoingBatch {
    messages: Mutex<Vec<(QueueName, TransportMessage)>>,
}

impl OutgoingBatch {
    fn push(&self, destination: QueueName, message: TransportMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination, message));
    }

    fn take(&self) -> Vec<(QueueName, TransportMessage)> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Flushes outgoing batches; cloned into commit callbacks
#[derive(Clone)]
struct SendDispatcher {
    factory: Arc<dyn QueueFactory>,
    codec: Arc<dyn MessageCodec>,
    clock: Arc<dyn Clock>,
    use_native_deferred_messages: bool,
}

impl SendDispatcher {
    /// Send every message, then fail if any single send failed
    async fn flush(&self, batch: Vec<(QueueName, TransportMessage)>) -> Result<(), TransportError> {
        let mut by_destination: BTreeMap<QueueName, Vec<TransportMessage>> = BTreeMap::new();
        for (destination, message) in batch {
            by_destination.entry(destination).or_default().push(message);
        }

        let mut failures: Vec<TransportError> = join_all(
            by_destination
                .into_iter()
                .map(|(destination, messages)| self.send_to(destination, messages)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(TransportError::SendBatchFailed { failures }),
        }
    }

    async fn send_to(
        &self,
        destination: QueueName,
        messages: Vec<TransportMessage>,
    ) -> Vec<TransportError> {
        let queue = match self.factory.get_queue(&destination).await {
            Ok(queue) => queue,
            Err(e) => return vec![e],
        };

        join_all(
            messages
                .into_iter()
                .map(|message| self.send_one(queue.as_ref(), &destination, message)),
        )
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }

    async fn send_one(
        &self,
        queue: &dyn StorageQueue,
        destination: &QueueName,
        mut message: TransportMessage,
    ) -> Result<(), TransportError> {
        let message_id = message.message_id_or_unknown();
        let mut options = EnqueueOptions::new();

        if let Some(ttl) = message.headers.get(headers::TIME_TO_BE_RECEIVED) {
            options.time_to_live = Some(parse_time_span(headers::TIME_TO_BE_RECEIVED, ttl)?);
        }

        if self.use_native_deferred_messages {
            if let Some(deferred_until) = message.headers.remove(headers::DEFERRED_UNTIL) {
                let deferred_until = parse_timestamp(headers::DEFERRED_UNTIL, &deferred_until)?;
                options.initial_visibility_delay =
                    (deferred_until - self.clock.now()).to_std().ok().filter(|d| !d.is_zero());
            }
        }

        let payload = self.codec.encode(&message)?;
        let queue_message_id = queue
            .send_message(&payload, &options)
            .await
            .map_err(|e| TransportError::SendFailed {
                message_id: message_id.clone(),
                destination: destination.to_string(),
                source: e,
            })?;

        debug!(
            message_id = %message_id,
            queue_message_id = %queue_message_id,
            destination = %destination,
            delay_ms = options.initial_visibility_delay.map(|d| d.as_millis() as u64),
            "Message sent"
        );
        Ok(())
    }
}
