//! Consumers: prefetch-bounded delivery, ack, reject and cancel
//!
//! Each consumer reads from one queue and holds at most `prefetch` unacked
//! messages. Consumer state sits behind its own `Mutex`; the lock order is
//! always consumer first, then queue.

use crate::broker::dead_letter::{DeadLetterHandler, DeadLetterReason};
use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::manager::BrokerManager;
use crate::broker::message::{Message, MessageId, MessageState};
use crate::broker::registry::Registry;
use crate::core::poll::{poll_until, PollPolicy};
use crate::core::sync::{handle_mutex_poison, handle_rwlock_read, handle_rwlock_write};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::SystemTime;

/// Acknowledged ids remembered per consumer so a repeated ack is harmless
const RECENT_ACKS: usize = 1024;

/// Broker-assigned consumer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Point-in-time consumer statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub id: ConsumerId,
    pub queue: String,
    pub prefetch: usize,
    pub unacked: usize,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
}

#[derive(Debug)]
struct ConsumerState {
    id: ConsumerId,
    queue: String,
    prefetch: usize,
    active: bool,
    unacked: BTreeMap<MessageId, Message>,
    recent_acks: VecDeque<MessageId>,
    delivered: u64,
    acked: u64,
    rejected: u64,
    requeued: u64,
}

impl ConsumerState {
    fn remember_ack(&mut self, id: MessageId) {
        if self.recent_acks.len() >= RECENT_ACKS {
            self.recent_acks.pop_front();
        }
        self.recent_acks.push_back(id);
    }

    fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            id: self.id,
            queue: self.queue.clone(),
            prefetch: self.prefetch,
            unacked: self.unacked.len(),
            delivered: self.delivered,
            acked: self.acked,
            rejected: self.rejected,
            requeued: self.requeued,
        }
    }
}

type SharedState = Arc<Mutex<ConsumerState>>;

/// Tracks every consumer and its unacked messages
#[derive(Debug)]
pub struct ConsumerManager {
    next_id: AtomicU64,
    consumers: RwLock<HashMap<ConsumerId, SharedState>>,
    default_max_deliveries: u32,
}

impl ConsumerManager {
    pub fn new(default_max_deliveries: u32) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            consumers: RwLock::new(HashMap::new()),
            default_max_deliveries,
        }
    }

    pub(crate) fn create(
        &self,
        registry: &Registry,
        queue: &str,
        prefetch: usize,
    ) -> BrokerResult<ConsumerId> {
        if prefetch == 0 {
            return Err(BrokerError::validation(format!(
                "prefetch for a consumer on '{}' must be at least 1",
                queue
            )));
        }
        // The queue check and the insert happen under one map lock
        let mut consumers = handle_rwlock_write(self.consumers.write(), BrokerError::internal)?;
        registry.queue(queue)?;

        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = ConsumerState {
            id,
            queue: queue.to_string(),
            prefetch,
            active: true,
            unacked: BTreeMap::new(),
            recent_acks: VecDeque::new(),
            delivered: 0,
            acked: 0,
            rejected: 0,
            requeued: 0,
        };
        consumers.insert(id, Arc::new(Mutex::new(state)));
        drop(consumers);

        log::debug!("Created {} on '{}' with prefetch {}", id, queue, prefetch);
        Ok(id)
    }

    fn get(&self, id: ConsumerId) -> BrokerResult<SharedState> {
        let consumers = handle_rwlock_read(self.consumers.read(), BrokerError::internal)?;
        consumers
            .get(&id)
            .cloned()
            .ok_or_else(|| BrokerError::ConsumerNotFound {
                consumer_id: id.to_string(),
            })
    }

    /// Deliver up to `max_records` messages without exceeding prefetch
    pub(crate) fn consume(
        &self,
        registry: &Registry,
        dead_letters: &DeadLetterHandler,
        id: ConsumerId,
        max_records: usize,
        now: SystemTime,
    ) -> BrokerResult<Vec<Message>> {
        let shared = self.get(id)?;
        let mut state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;
        if !state.active {
            return Err(BrokerError::ConsumerNotFound {
                consumer_id: id.to_string(),
            });
        }

        let available = state.prefetch.saturating_sub(state.unacked.len());
        let limit = available.min(max_records);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let store = registry.queue(&state.queue)?;
        let (batch, casualties) = store.dequeue(limit, now)?;

        let mut delivered = Vec::with_capacity(batch.len());
        for mut message in batch {
            message.state = MessageState::Delivered;
            message.delivery_count += 1;
            state.unacked.insert(message.id, message.clone());
            delivered.push(message);
        }
        state.delivered += delivered.len() as u64;
        let queue = state.queue.clone();
        drop(state);

        if !delivered.is_empty() {
            log::trace!("{} received {} messages from '{}'", id, delivered.len(), queue);
        }
        if !casualties.is_empty() {
            dead_letters.process(registry, &queue, casualties, now)?;
        }
        Ok(delivered)
    }

    pub(crate) fn ack(
        &self,
        registry: &Registry,
        id: ConsumerId,
        message_id: MessageId,
    ) -> BrokerResult<()> {
        let shared = self.get(id)?;
        let mut state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;

        match state.unacked.remove(&message_id) {
            Some(_) => {
                state.acked += 1;
                state.remember_ack(message_id);
                if let Some(store) = registry.find_queue(&state.queue)? {
                    store.record_ack();
                }
                log::trace!("{} acknowledged message {}", id, message_id);
                Ok(())
            }
            None if state.recent_acks.contains(&message_id) => {
                log::debug!("{} acknowledged message {} again, ignoring", id, message_id);
                Ok(())
            }
            None => Err(BrokerError::MessageNotFound {
                consumer_id: id.to_string(),
                message_id: message_id.to_string(),
            }),
        }
    }

    /// Reject an unacked message. With `requeue` it returns to its queue
    /// until the redelivery limit, after which it is dead-lettered.
    pub(crate) fn reject(
        &self,
        registry: &Registry,
        dead_letters: &DeadLetterHandler,
        id: ConsumerId,
        message_id: MessageId,
        requeue: bool,
        now: SystemTime,
    ) -> BrokerResult<()> {
        let shared = self.get(id)?;
        let mut state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;

        let message =
            state
                .unacked
                .remove(&message_id)
                .ok_or_else(|| BrokerError::MessageNotFound {
                    consumer_id: id.to_string(),
                    message_id: message_id.to_string(),
                })?;
        state.rejected += 1;
        let store = registry.queue(&state.queue)?;
        store.record_reject();

        let limit = store.max_deliveries().unwrap_or(self.default_max_deliveries);
        if requeue && message.delivery_count < limit {
            let evicted = store.requeue(message, now)?;
            state.requeued += 1;
            let queue = state.queue.clone();
            drop(state);
            if !evicted.is_empty() {
                dead_letters.process(registry, &queue, evicted, now)?;
            }
            return Ok(());
        }

        if requeue {
            log::warn!(
                "Message {} on '{}' reached redelivery limit {}, dead-lettering",
                message_id,
                state.queue,
                limit
            );
        } else {
            log::debug!("{} rejected message {} without requeue", id, message_id);
        }
        store.record_discard(1);
        let queue = state.queue.clone();
        drop(state);

        dead_letters.process(
            registry,
            &queue,
            vec![(message, DeadLetterReason::Rejected)],
            now,
        )
    }

    /// Stop delivery and return every unacked message to the queue
    pub(crate) fn cancel(
        &self,
        registry: &Registry,
        dead_letters: &DeadLetterHandler,
        id: ConsumerId,
        now: SystemTime,
    ) -> BrokerResult<usize> {
        let shared = handle_rwlock_write(self.consumers.write(), BrokerError::internal)?
            .remove(&id)
            .ok_or_else(|| BrokerError::ConsumerNotFound {
                consumer_id: id.to_string(),
            })?;

        let mut state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;
        state.active = false;
        let pending = std::mem::take(&mut state.unacked);
        let count = pending.len();

        let mut evicted = Vec::new();
        match registry.find_queue(&state.queue)? {
            Some(store) => {
                for message in pending.into_values() {
                    evicted.extend(store.requeue(message, now)?);
                }
            }
            None => log::debug!(
                "Queue '{}' is gone, discarding {} unacked messages of {}",
                state.queue,
                count,
                id
            ),
        }
        let queue = state.queue.clone();
        drop(state);

        log::debug!("Cancelled {}, requeued {} messages", id, count);
        if !evicted.is_empty() {
            dead_letters.process(registry, &queue, evicted, now)?;
        }
        Ok(count)
    }

    /// Remove every consumer of `queue`, discarding their unacked messages
    pub(crate) fn remove_for_queue(&self, queue: &str) -> BrokerResult<Vec<ConsumerId>> {
        let mut consumers = handle_rwlock_write(self.consumers.write(), BrokerError::internal)?;
        let mut removed = Vec::new();

        for (id, shared) in consumers.iter() {
            let mut state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;
            if state.queue == queue {
                state.active = false;
                let discarded = state.unacked.len();
                state.unacked.clear();
                if discarded > 0 {
                    log::warn!(
                        "Discarded {} unacked messages of {} with queue '{}'",
                        discarded,
                        id,
                        queue
                    );
                }
                removed.push(*id);
            }
        }
        for id in &removed {
            consumers.remove(id);
        }
        Ok(removed)
    }

    pub fn stats(&self, id: ConsumerId) -> BrokerResult<ConsumerStats> {
        let shared = self.get(id)?;
        let state = handle_mutex_poison(shared.lock(), BrokerError::internal)?;
        Ok(state.stats())
    }

    /// Statistics for every consumer, ordered by id
    pub fn all_stats(&self) -> BrokerResult<Vec<ConsumerStats>> {
        let shared: Vec<SharedState> = {
            let consumers = handle_rwlock_read(self.consumers.read(), BrokerError::internal)?;
            consumers.values().cloned().collect()
        };
        let mut stats = Vec::with_capacity(shared.len());
        for consumer in shared {
            stats.push(handle_mutex_poison(consumer.lock(), BrokerError::internal)?.stats());
        }
        stats.sort_by_key(|s| s.id);
        Ok(stats)
    }

    pub fn count(&self) -> BrokerResult<usize> {
        Ok(handle_rwlock_read(self.consumers.read(), BrokerError::internal)?.len())
    }
}

/// A subscription to one queue
///
/// Dropping the handle cancels the consumer, returning its unacked messages
/// to the queue.
///
/// # Example
///
/// ```rust
/// use routemq::broker::{BrokerManager, ExchangeKind, PublishOptions, QueueKind, QueueOptions};
/// use std::collections::BTreeMap;
///
/// # fn example() -> Result<(), routemq::broker::BrokerError> {
/// let broker = BrokerManager::create();
/// broker.declare_exchange("jobs", ExchangeKind::Direct)?;
/// broker.declare_queue("work", QueueOptions::new(QueueKind::Standard))?;
/// broker.bind("jobs", "work", "work", BTreeMap::new())?;
/// broker.publish("jobs", "work", "payload", PublishOptions::new())?;
///
/// let consumer = broker.subscribe("work", 10)?;
/// for message in consumer.consume(10)? {
///     consumer.ack(message.id)?;
/// }
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct ConsumerHandle {
    id: ConsumerId,
    queue: String,
    manager: Weak<BrokerManager>,
    cancelled: AtomicBool,
}

impl ConsumerHandle {
    pub(crate) fn new(id: ConsumerId, queue: String, manager: Weak<BrokerManager>) -> Self {
        Self {
            id,
            queue,
            manager,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn manager(&self) -> BrokerResult<Arc<BrokerManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| BrokerError::internal("BrokerManager no longer exists".to_string()))
    }

    pub fn consume(&self, max_records: usize) -> BrokerResult<Vec<Message>> {
        self.manager()?.consume(self.id, max_records)
    }

    /// Poll until at least one message arrives or the policy's timeout elapses
    pub async fn consume_wait(
        &self,
        max_records: usize,
        policy: PollPolicy,
    ) -> BrokerResult<Vec<Message>> {
        let manager = self.manager()?;
        let name = self.id.to_string();
        poll_until(&name, policy, || manager.consume(self.id, max_records)).await
    }

    pub fn ack(&self, message_id: MessageId) -> BrokerResult<()> {
        self.manager()?.ack(self.id, message_id)
    }

    pub fn reject(&self, message_id: MessageId, requeue: bool) -> BrokerResult<()> {
        self.manager()?.reject(self.id, message_id, requeue)
    }

    pub fn stats(&self) -> BrokerResult<ConsumerStats> {
        self.manager()?.consumer_stats(self.id)
    }

    /// Cancel explicitly, returning how many messages were requeued
    pub fn cancel(self) -> BrokerResult<usize> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.manager()?.cancel_consumer(self.id)
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            match manager.cancel_consumer(self.id) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => log::warn!("Failed to cancel {} on drop: {}", self.id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message::PublishOptions;
    use crate::broker::store::{QueueKind, QueueOptions};
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    struct Fixture {
        registry: Registry,
        dead_letters: DeadLetterHandler,
        consumers: ConsumerManager,
    }

    fn fixture(messages: u64, options: QueueOptions) -> Fixture {
        let registry = Registry::new();
        let store = registry.declare_queue("work", options).unwrap();
        for id in 1..=messages {
            let message = Message::new(
                MessageId(id),
                "work",
                Arc::from(&b"job"[..]),
                &PublishOptions::new(),
                at(0),
            );
            store.enqueue(message, at(0)).unwrap();
        }
        Fixture {
            registry,
            dead_letters: DeadLetterHandler::new(100),
            consumers: ConsumerManager::new(3),
        }
    }

    impl Fixture {
        fn consume(&self, id: ConsumerId, max: usize) -> Vec<Message> {
            self.consumers
                .consume(&self.registry, &self.dead_letters, id, max, at(0))
                .unwrap()
        }

        fn reject(&self, id: ConsumerId, message: MessageId, requeue: bool) {
            self.consumers
                .reject(&self.registry, &self.dead_letters, id, message, requeue, at(0))
                .unwrap();
        }
    }

    #[test]
    fn test_prefetch_zero_is_invalid() {
        let f = fixture(0, QueueOptions::new(QueueKind::Standard));
        assert!(matches!(
            f.consumers.create(&f.registry, "work", 0),
            Err(BrokerError::Validation { .. })
        ));
        assert!(matches!(
            f.consumers.create(&f.registry, "missing", 1),
            Err(BrokerError::QueueNotFound { .. })
        ));
    }

    #[test]
    fn test_consume_respects_prefetch() {
        let f = fixture(10, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 3).unwrap();

        let first = f.consume(id, 10);
        assert_eq!(first.len(), 3);
        assert!(f.consume(id, 10).is_empty());

        f.consumers.ack(&f.registry, id, first[0].id).unwrap();
        assert_eq!(f.consume(id, 10).len(), 1);
        assert_eq!(f.consumers.stats(id).unwrap().unacked, 3);
    }

    #[test]
    fn test_delivered_message_state() {
        let f = fixture(1, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 1).unwrap();

        let delivered = f.consume(id, 1);
        assert_eq!(delivered[0].state, MessageState::Delivered);
        assert_eq!(delivered[0].delivery_count, 1);
        assert!(!delivered[0].is_redelivered());
    }

    #[test]
    fn test_double_ack_is_noop_and_unknown_is_error() {
        let f = fixture(1, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 1).unwrap();
        let message = f.consume(id, 1).remove(0);

        f.consumers.ack(&f.registry, id, message.id).unwrap();
        f.consumers.ack(&f.registry, id, message.id).unwrap();
        assert_eq!(f.consumers.stats(id).unwrap().acked, 1);

        let err = f
            .consumers
            .ack(&f.registry, id, MessageId(999))
            .unwrap_err();
        assert!(matches!(err, BrokerError::MessageNotFound { .. }));
    }

    #[test]
    fn test_reject_requeues_until_limit() {
        let f = fixture(1, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 1).unwrap();

        for attempt in 1..=3 {
            let message = f.consume(id, 1).remove(0);
            assert_eq!(message.delivery_count, attempt);
            f.reject(id, message.id, true);
        }

        assert!(f.consume(id, 1).is_empty());
        let stats = f.dead_letters.stats().unwrap();
        assert_eq!(stats.rejected, 1);
        let store = f.registry.queue("work").unwrap().stats(at(0)).unwrap();
        assert_eq!(store.requeued, 2);
        assert_eq!(store.rejected, 3);
        assert_eq!(store.unacked, 0);
    }

    #[test]
    fn test_queue_max_deliveries_override() {
        let f = fixture(1, QueueOptions::new(QueueKind::Standard).max_deliveries(1));
        let id = f.consumers.create(&f.registry, "work", 1).unwrap();

        let message = f.consume(id, 1).remove(0);
        f.reject(id, message.id, true);

        assert!(f.consume(id, 1).is_empty());
        assert_eq!(f.dead_letters.stats().unwrap().rejected, 1);
    }

    #[test]
    fn test_reject_without_requeue_dead_letters() {
        let f = fixture(2, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 2).unwrap();

        let message = f.consume(id, 1).remove(0);
        f.reject(id, message.id, false);

        let entries = f.dead_letters.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, DeadLetterReason::Rejected);
        assert_eq!(entries[0].source_queue, "work");
    }

    #[test]
    fn test_cancel_requeues_in_original_order() {
        let f = fixture(3, QueueOptions::new(QueueKind::Standard));
        let id = f.consumers.create(&f.registry, "work", 2).unwrap();
        assert_eq!(f.consume(id, 2).len(), 2);

        assert_eq!(f.consumers.cancel(&f.registry, &f.dead_letters, id, at(0)).unwrap(), 2);

        let ids: Vec<u64> = f
            .registry
            .queue("work")
            .unwrap()
            .browse(10)
            .unwrap()
            .iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(f.consumers.stats(id).unwrap_err().is_not_found());
        assert!(f.consumers.cancel(&f.registry, &f.dead_letters, id, at(0)).is_err());
    }

    #[test]
    fn test_remove_for_queue() {
        let f = fixture(2, QueueOptions::new(QueueKind::Standard));
        let a = f.consumers.create(&f.registry, "work", 1).unwrap();
        let b = f.consumers.create(&f.registry, "work", 1).unwrap();
        f.consume(a, 1);

        let mut removed = f.consumers.remove_for_queue("work").unwrap();
        removed.sort();
        assert_eq!(removed, vec![a, b]);
        assert_eq!(f.consumers.count().unwrap(), 0);
    }

    #[test]
    fn test_consumer_id_display() {
        assert_eq!(ConsumerId(7).to_string(), "consumer-7");
    }
}
