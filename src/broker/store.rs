//! Queue storage
//!
//! A `QueueStore` owns the messages of one named queue. Three disciplines are
//! supported: `standard` (arrival order), `priority` (highest priority first,
//! arrival order within a priority) and `delay` (earliest `available_at`
//! first). All mutations go through one `Mutex`; counters are atomics so
//! statistics never contend with delivery.
//!
//! The store never calls out while locked. Messages that leave the queue
//! involuntarily (expiry, overflow) are handed back to the caller, which
//! routes them to the dead-letter handler once the lock is released.

use crate::broker::dead_letter::DeadLetterReason;
use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::message::{Message, MessageState};
use crate::core::sync::{handle_mutex_poison, handle_rwlock_read, handle_rwlock_write};
use crate::core::time::deadline;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime};
use strum_macros::{AsRefStr, Display, EnumString};

/// Messages removed from a queue that must be dead-lettered
pub(crate) type Casualties = Vec<(Message, DeadLetterReason)>;

/// Ordering discipline of a queue
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    #[default]
    Standard,
    Priority,
    Delay,
}

/// Declaration options for a queue
///
/// # Example
///
/// ```rust
/// use routemq::broker::{QueueKind, QueueOptions};
/// use std::time::Duration;
///
/// let options = QueueOptions::new(QueueKind::Priority)
///     .max_length(1000)
///     .default_ttl(Duration::from_secs(60))
///     .dead_letter("orders.dlq");
/// assert_eq!(options.max_length, 1000);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub kind: QueueKind,
    /// 0 means unbounded
    pub max_length: usize,
    pub default_ttl: Option<Duration>,
    /// Overrides the broker-wide redelivery limit
    pub max_deliveries: Option<u32>,
    pub dead_letter: Option<String>,
}

impl QueueOptions {
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    pub fn dead_letter(mut self, target: impl Into<String>) -> Self {
        self.dead_letter = Some(target.into());
        self
    }

    /// Redeclaration check; the dead-letter target is mutable and not compared
    pub(crate) fn is_compatible_with(&self, other: &QueueOptions) -> bool {
        self.kind == other.kind
            && self.max_length == other.max_length
            && self.default_ttl == other.default_ttl
            && self.max_deliveries == other.max_deliveries
    }
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub kind: String,
    /// Messages stored, ready or not
    pub depth: usize,
    /// Stored messages deliverable right now
    pub ready: usize,
    /// Delivered to a consumer and awaiting ack/reject
    pub unacked: u64,
    pub bytes: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub expired: u64,
    pub overflowed: u64,
    pub purged: u64,
    pub dead_letter: Option<String>,
}

/// Priority heap entry: higher priority first, then lower sequence
#[derive(Debug)]
struct PriorityEntry(Message);

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.envelope.sequence.cmp(&self.0.envelope.sequence))
    }
}

/// Delay heap entry: earlier `available_at` first, then lower sequence
#[derive(Debug)]
struct DelayEntry(Message);

impl DelayEntry {
    fn available_at(&self) -> SystemTime {
        self.0
            .envelope
            .available_at
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

impl PartialEq for DelayEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for DelayEntry {}

impl PartialOrd for DelayEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .available_at()
            .cmp(&self.available_at())
            .then_with(|| other.0.envelope.sequence.cmp(&self.0.envelope.sequence))
    }
}

#[derive(Debug)]
enum Container {
    /// Sorted by sequence
    Fifo(VecDeque<Message>),
    Priority(BinaryHeap<PriorityEntry>),
    Delay(BinaryHeap<DelayEntry>),
}

impl Container {
    fn new(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Standard => Container::Fifo(VecDeque::new()),
            QueueKind::Priority => Container::Priority(BinaryHeap::new()),
            QueueKind::Delay => Container::Delay(BinaryHeap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Container::Fifo(items) => items.len(),
            Container::Priority(heap) => heap.len(),
            Container::Delay(heap) => heap.len(),
        }
    }

    fn push(&mut self, message: Message) {
        match self {
            Container::Fifo(items) => {
                let sequence = message.envelope.sequence;
                if items
                    .back()
                    .map_or(true, |last| last.envelope.sequence < sequence)
                {
                    items.push_back(message);
                } else {
                    let at = items.partition_point(|m| m.envelope.sequence < sequence);
                    items.insert(at, message);
                }
            }
            Container::Priority(heap) => heap.push(PriorityEntry(message)),
            Container::Delay(heap) => heap.push(DelayEntry(message)),
        }
    }

    fn peek(&self) -> Option<&Message> {
        match self {
            Container::Fifo(items) => items.front(),
            Container::Priority(heap) => heap.peek().map(|entry| &entry.0),
            Container::Delay(heap) => heap.peek().map(|entry| &entry.0),
        }
    }

    fn pop(&mut self) -> Option<Message> {
        match self {
            Container::Fifo(items) => items.pop_front(),
            Container::Priority(heap) => heap.pop().map(|entry| entry.0),
            Container::Delay(heap) => heap.pop().map(|entry| entry.0),
        }
    }

    fn clear(&mut self) -> usize {
        let count = self.len();
        match self {
            Container::Fifo(items) => items.clear(),
            Container::Priority(heap) => heap.clear(),
            Container::Delay(heap) => heap.clear(),
        }
        count
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Message> + '_> {
        match self {
            Container::Fifo(items) => Box::new(items.iter()),
            Container::Priority(heap) => Box::new(heap.iter().map(|entry| &entry.0)),
            Container::Delay(heap) => Box::new(heap.iter().map(|entry| &entry.0)),
        }
    }

    /// Messages cloned in the order `pop` would return them
    fn snapshot(&self, limit: usize) -> Vec<Message> {
        match self {
            Container::Fifo(items) => items.iter().take(limit).cloned().collect(),
            Container::Priority(heap) => {
                let mut entries: Vec<&PriorityEntry> = heap.iter().collect();
                entries.sort_by(|a, b| b.cmp(a));
                entries.into_iter().take(limit).map(|e| e.0.clone()).collect()
            }
            Container::Delay(heap) => {
                let mut entries: Vec<&DelayEntry> = heap.iter().collect();
                entries.sort_by(|a, b| b.cmp(a));
                entries.into_iter().take(limit).map(|e| e.0.clone()).collect()
            }
        }
    }

    /// Remove the message with the lowest sequence, preferring deliverable ones
    fn remove_oldest(&mut self, now: SystemTime) -> Option<Message> {
        match self {
            Container::Fifo(items) => items.pop_front(),
            Container::Priority(heap) => {
                let mut items: Vec<Message> =
                    std::mem::take(heap).into_iter().map(|e| e.0).collect();
                let victim = take_oldest(&mut items, now);
                *heap = items.into_iter().map(PriorityEntry).collect();
                victim
            }
            Container::Delay(heap) => {
                let mut items: Vec<Message> =
                    std::mem::take(heap).into_iter().map(|e| e.0).collect();
                let victim = take_oldest(&mut items, now);
                *heap = items.into_iter().map(DelayEntry).collect();
                victim
            }
        }
    }
}

fn take_oldest(items: &mut Vec<Message>, now: SystemTime) -> Option<Message> {
    let oldest_ready = items
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_gated(now))
        .min_by_key(|(_, m)| m.envelope.sequence)
        .map(|(index, _)| index);
    let index = oldest_ready.or_else(|| {
        items
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| m.envelope.sequence)
            .map(|(index, _)| index)
    })?;
    Some(items.swap_remove(index))
}

#[derive(Debug)]
struct QueueState {
    container: Container,
    next_sequence: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
    expired: AtomicU64,
    overflowed: AtomicU64,
    purged: AtomicU64,
    unacked: AtomicU64,
}

impl QueueCounters {
    fn settle_unacked(&self, count: u64) {
        let _ = self
            .unacked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }
}

/// Storage for one named queue
#[derive(Debug)]
pub struct QueueStore {
    name: String,
    options: QueueOptions,
    dead_letter: RwLock<Option<String>>,
    state: Mutex<QueueState>,
    counters: QueueCounters,
}

impl QueueStore {
    pub fn new(name: impl Into<String>, options: QueueOptions) -> Self {
        Self {
            name: name.into(),
            dead_letter: RwLock::new(options.dead_letter.clone()),
            state: Mutex::new(QueueState {
                container: Container::new(options.kind),
                next_sequence: 1,
            }),
            options,
            counters: QueueCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> QueueKind {
        self.options.kind
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn max_deliveries(&self) -> Option<u32> {
        self.options.max_deliveries
    }

    pub fn dead_letter_target(&self) -> BrokerResult<Option<String>> {
        Ok(handle_rwlock_read(self.dead_letter.read(), BrokerError::internal)?.clone())
    }

    pub(crate) fn set_dead_letter_target(&self, target: Option<String>) -> BrokerResult<()> {
        *handle_rwlock_write(self.dead_letter.write(), BrokerError::internal)? = target;
        Ok(())
    }

    fn lock_state(&self) -> BrokerResult<std::sync::MutexGuard<'_, QueueState>> {
        handle_mutex_poison(self.state.lock(), BrokerError::internal)
    }

    /// Store a new message, returning anything evicted to make room
    pub(crate) fn enqueue(&self, mut message: Message, now: SystemTime) -> BrokerResult<Casualties> {
        let mut casualties = Vec::new();
        let mut state = self.lock_state()?;

        message.state = MessageState::Pending;
        message.envelope.sequence = state.next_sequence;
        state.next_sequence += 1;

        message.envelope.expires_at = message
            .ttl
            .or(self.options.default_ttl)
            .map(|ttl| deadline(now, ttl));

        match (self.options.kind, message.delay) {
            (QueueKind::Delay, delay) => {
                message.envelope.available_at = Some(deadline(now, delay.unwrap_or_default()));
            }
            (_, Some(delay)) if !delay.is_zero() => {
                log::debug!(
                    "Queue '{}' is {}, ignoring delay of {:?} on message {}",
                    self.name,
                    self.options.kind,
                    delay,
                    message.id
                );
                message.envelope.available_at = None;
            }
            _ => message.envelope.available_at = None,
        }

        // Leave room for the incoming message
        self.evict_overflow(&mut state, 1, now, &mut casualties);

        log::trace!(
            "Queue '{}' stored message {} at sequence {}",
            self.name,
            message.id,
            message.envelope.sequence
        );
        state.container.push(message);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        Ok(casualties)
    }

    /// Pop up to `limit` deliverable messages in discipline order.
    ///
    /// Expired heads are removed and returned as casualties. The scan stops
    /// at the first head that is not yet available.
    pub(crate) fn dequeue(
        &self,
        limit: usize,
        now: SystemTime,
    ) -> BrokerResult<(Vec<Message>, Casualties)> {
        let mut delivered = Vec::new();
        let mut casualties = Vec::new();
        if limit == 0 {
            return Ok((delivered, casualties));
        }

        let mut state = self.lock_state()?;
        while delivered.len() < limit {
            let Some(head) = state.container.peek() else {
                break;
            };
            if head.is_expired(now) {
                if let Some(expired) = state.container.pop() {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Queue '{}' expired message {}", self.name, expired.id);
                    casualties.push((expired, DeadLetterReason::Expired));
                }
                continue;
            }
            if head.is_gated(now) {
                break;
            }
            if let Some(message) = state.container.pop() {
                delivered.push(message);
            }
        }
        drop(state);

        let count = delivered.len() as u64;
        self.counters.delivered.fetch_add(count, Ordering::Relaxed);
        self.counters.unacked.fetch_add(count, Ordering::AcqRel);
        Ok((delivered, casualties))
    }

    /// Evict oldest messages until `reserve` more fit under `max_length`
    fn evict_overflow(
        &self,
        state: &mut QueueState,
        reserve: usize,
        now: SystemTime,
        casualties: &mut Casualties,
    ) {
        if self.options.max_length == 0 {
            return;
        }
        while state.container.len() + reserve > self.options.max_length {
            let Some(victim) = state.container.remove_oldest(now) else {
                break;
            };
            self.counters.overflowed.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Queue '{}' at max_length {}, evicting message {}",
                self.name,
                self.options.max_length,
                victim.id
            );
            casualties.push((victim, DeadLetterReason::Overflow));
        }
    }

    /// Return an unacknowledged message to its original position.
    ///
    /// A bounded queue that filled up while the message was out evicts its
    /// oldest messages as overflow, which may be the returned message itself.
    pub(crate) fn requeue(&self, mut message: Message, now: SystemTime) -> BrokerResult<Casualties> {
        message.state = MessageState::Pending;
        let mut casualties = Vec::new();
        let mut state = self.lock_state()?;
        log::debug!(
            "Queue '{}' requeued message {} (delivery {})",
            self.name,
            message.id,
            message.delivery_count
        );
        state.container.push(message);
        self.evict_overflow(&mut state, 0, now, &mut casualties);
        drop(state);

        self.counters.requeued.fetch_add(1, Ordering::Relaxed);
        self.counters.settle_unacked(1);
        Ok(casualties)
    }

    pub(crate) fn record_ack(&self) {
        self.counters.acked.fetch_add(1, Ordering::Relaxed);
        self.counters.settle_unacked(1);
    }

    /// Count a reject; the message is settled separately by `requeue` or `record_discard`
    pub(crate) fn record_reject(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Unacked messages discarded without ack or requeue
    pub(crate) fn record_discard(&self, count: u64) {
        self.counters.settle_unacked(count);
    }

    /// Drop every stored message; in-flight messages are unaffected
    pub fn purge(&self) -> BrokerResult<usize> {
        let count = self.lock_state()?.container.clear();
        self.counters.purged.fetch_add(count as u64, Ordering::Relaxed);
        log::info!("Queue '{}' purged {} messages", self.name, count);
        Ok(count)
    }

    /// Copies of up to `limit` stored messages in delivery order
    pub fn browse(&self, limit: usize) -> BrokerResult<Vec<Message>> {
        Ok(self.lock_state()?.container.snapshot(limit))
    }

    pub fn len(&self) -> BrokerResult<usize> {
        Ok(self.lock_state()?.container.len())
    }

    pub fn is_empty(&self) -> BrokerResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self, now: SystemTime) -> BrokerResult<QueueStats> {
        let (depth, ready, bytes) = {
            let state = self.lock_state()?;
            let ready = state
                .container
                .iter()
                .filter(|m| !m.is_expired(now) && !m.is_gated(now))
                .count();
            let bytes = state.container.iter().map(Message::approximate_size).sum();
            (state.container.len(), ready, bytes)
        };

        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Ok(QueueStats {
            name: self.name.clone(),
            kind: self.options.kind.to_string(),
            depth,
            ready,
            unacked: load(&self.counters.unacked),
            bytes,
            enqueued: load(&self.counters.enqueued),
            delivered: load(&self.counters.delivered),
            acked: load(&self.counters.acked),
            rejected: load(&self.counters.rejected),
            requeued: load(&self.counters.requeued),
            expired: load(&self.counters.expired),
            overflowed: load(&self.counters.overflowed),
            purged: load(&self.counters.purged),
            dead_letter: self.dead_letter_target()?,
        })
    }
}
