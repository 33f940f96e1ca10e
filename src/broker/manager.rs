//! BrokerManager - the broker facade
//!
//! `BrokerManager` ties the registry, queue stores, consumers, dead-letter
//! handler and idempotency window together behind one thread-safe API. It is
//! normally shared as `Arc<BrokerManager>`; publisher and consumer handles
//! hold a `Weak` reference back to it.

use crate::broker::config::{BrokerConfig, BrokerSettings};
use crate::broker::consumer::{ConsumerHandle, ConsumerId, ConsumerManager, ConsumerStats};
use crate::broker::dead_letter::{DeadLetterEntry, DeadLetterHandler, DeadLetterStats};
use crate::broker::dedup::IdempotencyStore;
use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::exchange::{Binding, ExchangeKind, ExchangeStats};
use crate::broker::message::{Message, MessageId, PublishOptions};
use crate::broker::publisher::{
    validate_options, DeliveryMode, PublishResult, PublishStatus, Publisher, DEFAULT_PRODUCER,
};
use crate::broker::registry::Registry;
use crate::broker::store::{QueueOptions, QueueStats};
use crate::broker::types::BrokerStats;
use crate::core::sync::handle_mutex_poison;
use crate::core::time::{Clock, SystemClock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// In-process message broker
///
/// # Thread Safety
///
/// Every method takes `&self`. Registry maps are behind `RwLock`s, each queue
/// and each consumer behind its own `Mutex`; at most one queue lock is held
/// at a time.
///
/// # Example
///
/// ```rust
/// use routemq::broker::{BrokerManager, ExchangeKind, PublishOptions, QueueKind, QueueOptions};
/// use std::collections::BTreeMap;
///
/// # fn example() -> Result<(), routemq::broker::BrokerError> {
/// let broker = BrokerManager::create();
/// broker.declare_exchange("events", ExchangeKind::Topic)?;
/// broker.declare_queue("billing", QueueOptions::new(QueueKind::Standard))?;
/// broker.bind("events", "billing", "invoice.*", BTreeMap::new())?;
///
/// let result = broker.publish("events", "invoice.paid", "{}", PublishOptions::new())?;
/// assert_eq!(result.routed_count, 1);
///
/// let consumer = broker.create_consumer("billing", 5)?;
/// let messages = broker.consume(consumer, 5)?;
/// broker.ack(consumer, messages[0].id)?;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct BrokerManager {
    settings: BrokerSettings,
    registry: Registry,
    consumers: ConsumerManager,
    dead_letters: DeadLetterHandler,
    dedup: IdempotencyStore,
    next_message_id: AtomicU64,
    published: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for BrokerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerManager")
            .field("settings", &self.settings)
            .field("next_message_id", &self.next_message_id)
            .finish_non_exhaustive()
    }
}

impl Default for BrokerManager {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl BrokerManager {
    pub fn new(settings: BrokerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Build a broker that reads time from `clock` for TTL and delay deadlines
    pub fn with_clock(settings: BrokerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Registry::new(),
            consumers: ConsumerManager::new(settings.max_deliveries),
            dead_letters: DeadLetterHandler::new(settings.dead_letter_history),
            dedup: IdempotencyStore::new(settings.dedup_window, settings.dedup_producers),
            next_message_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            clock,
            settings,
        }
    }

    /// Shared broker with default settings
    pub fn create() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_with(settings: BrokerSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub fn create_with_clock(settings: BrokerSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self::with_clock(settings, clock))
    }

    /// Shared broker with settings and topology taken from `config`
    pub fn from_config(config: &BrokerConfig) -> BrokerResult<Arc<Self>> {
        config.validate()?;
        let broker = Self::create_with(config.broker.clone());
        broker.apply_topology(config)?;
        Ok(broker)
    }

    /// Declare the exchanges, queues, dead-letter targets and bindings of `config`.
    ///
    /// Queues are declared before dead-letter targets are wired, so a target
    /// may appear later in the file than the queue that uses it.
    pub fn apply_topology(&self, config: &BrokerConfig) -> BrokerResult<()> {
        for exchange in &config.exchanges {
            self.declare_exchange(&exchange.name, exchange.kind)?;
        }
        for queue in &config.queues {
            let mut options = queue.options();
            options.dead_letter = None;
            self.declare_queue(&queue.name, options)?;
        }
        for queue in &config.queues {
            if let Some(target) = &queue.dead_letter {
                self.configure_dead_letter(&queue.name, target)?;
            }
        }
        for binding in &config.bindings {
            self.bind(
                &binding.exchange,
                &binding.queue,
                &binding.pattern,
                binding.arguments.clone(),
            )?;
        }
        log::info!(
            "Topology applied: {} exchanges, {} queues, {} bindings",
            config.exchanges.len(),
            config.queues.len(),
            config.bindings.len()
        );
        Ok(())
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    fn next_message_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns `true` if the exchange was created
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> BrokerResult<bool> {
        self.registry.declare_exchange(name, kind)
    }

    pub fn delete_exchange(&self, name: &str) -> BrokerResult<()> {
        self.registry.delete_exchange(name)
    }

    /// Declare a queue. Redeclaring with compatible options is a no-op.
    ///
    /// A dead-letter target given here does not have to exist yet; messages
    /// are dropped until it does.
    pub fn declare_queue(&self, name: &str, options: QueueOptions) -> BrokerResult<()> {
        self.registry.declare_queue(name, options).map(|_| ())
    }

    /// Delete a queue, its bindings and its consumers. Stored and unacked
    /// messages are discarded.
    pub fn delete_queue(&self, name: &str) -> BrokerResult<()> {
        let store = self.registry.remove_queue(name)?;
        let removed = self.consumers.remove_for_queue(name)?;
        log::info!(
            "Deleted queue '{}' with {} messages and {} consumers",
            name,
            store.len()?,
            removed.len()
        );
        Ok(())
    }

    pub fn bind(
        &self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        arguments: BTreeMap<String, String>,
    ) -> BrokerResult<bool> {
        self.registry.bind(exchange, queue, pattern, arguments)
    }

    pub fn unbind(
        &self,
        exchange: &str,
        queue: &str,
        pattern: &str,
        arguments: &BTreeMap<String, String>,
    ) -> BrokerResult<bool> {
        self.registry.unbind(exchange, queue, pattern, arguments)
    }

    pub fn bindings(&self) -> BrokerResult<Vec<Binding>> {
        self.registry.bindings()
    }

    /// Route failures out of `queue` to `target`
    pub fn configure_dead_letter(&self, queue: &str, target: &str) -> BrokerResult<()> {
        if queue == target {
            return Err(BrokerError::validation(format!(
                "queue '{}' cannot be its own dead-letter target",
                queue
            )));
        }
        let store = self.registry.queue(queue)?;
        self.registry.queue(target)?;
        store.set_dead_letter_target(Some(target.to_string()))?;
        log::info!("Queue '{}' now dead-letters to '{}'", queue, target);
        Ok(())
    }

    pub fn clear_dead_letter(&self, queue: &str) -> BrokerResult<()> {
        self.registry.queue(queue)?.set_dead_letter_target(None)?;
        log::info!("Queue '{}' no longer dead-letters", queue);
        Ok(())
    }

    pub fn purge_queue(&self, name: &str) -> BrokerResult<usize> {
        self.registry.queue(name)?.purge()
    }

    /// Publish with the broker's default delivery mode
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl AsRef<[u8]>,
        options: PublishOptions,
    ) -> BrokerResult<PublishResult> {
        self.publish_as(
            DEFAULT_PRODUCER,
            self.settings.delivery_mode,
            exchange,
            routing_key,
            body.as_ref(),
            options,
        )
    }

    pub fn create_publisher(
        self: &Arc<Self>,
        producer_id: &str,
        mode: DeliveryMode,
    ) -> BrokerResult<Publisher> {
        if producer_id.trim().is_empty() {
            return Err(BrokerError::validation("producer id must not be empty"));
        }
        log::debug!("Created {} publisher '{}'", mode, producer_id);
        Ok(Publisher::new(
            producer_id.to_string(),
            mode,
            Arc::downgrade(self),
        ))
    }

    pub(crate) fn publish_as(
        &self,
        producer_id: &str,
        mode: DeliveryMode,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> BrokerResult<PublishResult> {
        validate_options(&options, mode)?;
        let now = self.clock.now();

        match (mode, options.sequence) {
            (DeliveryMode::ExactlyOnce, Some(sequence)) => {
                let window = self.dedup.window(producer_id)?;
                let mut window = handle_mutex_poison(window.lock(), BrokerError::internal)?;
                if let Some(duplicate) = window.duplicate_of(sequence) {
                    log::debug!(
                        "Producer '{}' sequence {} already published as message {}",
                        producer_id,
                        sequence,
                        duplicate.message_id
                    );
                    return Ok(duplicate);
                }
                let result = self.route_and_store(exchange, routing_key, body, &options, mode, now)?;
                window.remember(sequence, result.clone());
                Ok(result)
            }
            _ => self.route_and_store(exchange, routing_key, body, &options, mode, now),
        }
    }

    fn route_and_store(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: &PublishOptions,
        mode: DeliveryMode,
        now: SystemTime,
    ) -> BrokerResult<PublishResult> {
        let primary = self.next_message_id();
        let message = Message::new(primary, routing_key, Arc::from(body), options, now);
        let matched = self.registry.route(exchange, &message)?;

        let mut copies = Vec::with_capacity(matched.len());
        for queue in matched {
            // deleted between routing and storing
            let Some(store) = self.registry.find_queue(&queue)? else {
                continue;
            };
            let copy = if copies.is_empty() {
                message.clone()
            } else {
                message.copy_with_id(self.next_message_id())
            };
            let id = copy.id;
            let casualties = store.enqueue(copy, now)?;
            if !casualties.is_empty() {
                self.dead_letters
                    .process(&self.registry, &queue, casualties, now)?;
            }
            copies.push((queue, id));
        }
        self.registry.record_publish(exchange, !copies.is_empty())?;

        if copies.is_empty() {
            return match mode {
                DeliveryMode::AtMostOnce => {
                    log::debug!(
                        "Message {} to '{}' with key '{}' matched no queue, discarded",
                        primary,
                        exchange,
                        routing_key
                    );
                    Ok(PublishResult {
                        message_id: primary,
                        routed_count: 0,
                        copies,
                        status: PublishStatus::Unroutable,
                    })
                }
                DeliveryMode::AtLeastOnce | DeliveryMode::ExactlyOnce => {
                    log::warn!(
                        "Message to '{}' with key '{}' matched no queue",
                        exchange,
                        routing_key
                    );
                    Err(BrokerError::Unroutable {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                    })
                }
            };
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Published message {} to '{}' with key '{}' into {} queues",
            primary,
            exchange,
            routing_key,
            copies.len()
        );
        Ok(PublishResult {
            message_id: copies[0].1,
            routed_count: copies.len(),
            copies,
            status: PublishStatus::Routed,
        })
    }

    pub fn create_consumer(&self, queue: &str, prefetch: usize) -> BrokerResult<ConsumerId> {
        self.consumers.create(&self.registry, queue, prefetch)
    }

    /// Create a consumer wrapped in a handle that cancels it when dropped
    pub fn subscribe(self: &Arc<Self>, queue: &str, prefetch: usize) -> BrokerResult<ConsumerHandle> {
        let id = self.create_consumer(queue, prefetch)?;
        Ok(ConsumerHandle::new(
            id,
            queue.to_string(),
            Arc::downgrade(self),
        ))
    }

    /// Deliver up to `max_records` messages; never blocks
    pub fn consume(&self, consumer: ConsumerId, max_records: usize) -> BrokerResult<Vec<Message>> {
        self.consumers.consume(
            &self.registry,
            &self.dead_letters,
            consumer,
            max_records,
            self.clock.now(),
        )
    }

    pub fn ack(&self, consumer: ConsumerId, message_id: MessageId) -> BrokerResult<()> {
        self.consumers.ack(&self.registry, consumer, message_id)
    }

    pub fn reject(
        &self,
        consumer: ConsumerId,
        message_id: MessageId,
        requeue: bool,
    ) -> BrokerResult<()> {
        self.consumers.reject(
            &self.registry,
            &self.dead_letters,
            consumer,
            message_id,
            requeue,
            self.clock.now(),
        )
    }

    /// Cancel a consumer, returning how many unacked messages were requeued
    pub fn cancel_consumer(&self, consumer: ConsumerId) -> BrokerResult<usize> {
        self.consumers
            .cancel(&self.registry, &self.dead_letters, consumer, self.clock.now())
    }

    pub fn queue_stats(&self, name: &str) -> BrokerResult<QueueStats> {
        self.registry.queue(name)?.stats(self.clock.now())
    }

    pub fn exchange_stats(&self, name: &str) -> BrokerResult<ExchangeStats> {
        self.registry.exchange_stats(name)
    }

    pub fn consumer_stats(&self, consumer: ConsumerId) -> BrokerResult<ConsumerStats> {
        self.consumers.stats(consumer)
    }

    pub fn dead_letter_stats(&self) -> BrokerResult<DeadLetterStats> {
        self.dead_letters.stats()
    }

    /// Recent dead-letterings, oldest first
    pub fn dead_letter_entries(&self) -> BrokerResult<Vec<DeadLetterEntry>> {
        self.dead_letters.entries()
    }

    /// Recent dead-letterings out of `queue`, oldest first
    pub fn dead_letter_entries_for(&self, queue: &str) -> BrokerResult<Vec<DeadLetterEntry>> {
        self.dead_letters.entries_for(queue)
    }

    /// Copies of up to `limit` stored messages in delivery order
    pub fn browse_queue(&self, name: &str, limit: usize) -> BrokerResult<Vec<Message>> {
        self.registry.queue(name)?.browse(limit)
    }

    pub fn queue_names(&self) -> BrokerResult<Vec<String>> {
        Ok(self
            .registry
            .queues()?
            .iter()
            .map(|store| store.name().to_string())
            .collect())
    }

    pub fn stats(&self) -> BrokerResult<BrokerStats> {
        let now = self.clock.now();
        let queues = self
            .registry
            .queues()?
            .iter()
            .map(|store| store.stats(now))
            .collect::<BrokerResult<Vec<_>>>()?;

        Ok(BrokerStats {
            captured_at: BrokerStats::timestamp(now),
            messages_published: self.published.load(Ordering::Relaxed),
            queues,
            exchanges: self.registry.all_exchange_stats()?,
            consumers: self.consumers.all_stats()?,
            dead_letters: self.dead_letters.stats()?,
        })
    }
}
