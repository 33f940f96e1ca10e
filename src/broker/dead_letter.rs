//! Dead-letter handling
//!
//! Messages that expire, overflow or exhaust their redeliveries are moved to
//! the source queue's dead-letter target, annotated with where they came
//! from and why. A target's own overflow is processed on the same work list,
//! so at most one queue lock is ever held. Messages with nowhere to go are
//! dropped and counted.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::message::{
    Message, MessageState, X_DEATH_COUNT, X_DEATH_REASON, X_ORIGINAL_QUEUE,
};
use crate::broker::registry::Registry;
use crate::broker::store::Casualties;
use crate::core::sync::handle_mutex_poison;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use strum_macros::{AsRefStr, Display, EnumString};

/// Why a message left its queue involuntarily
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    Expired,
    Overflow,
    Rejected,
}

/// A record of one dead-lettering
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEntry {
    pub message: Message,
    pub reason: DeadLetterReason,
    pub source_queue: String,
    /// `None` when the message was dropped
    pub target_queue: Option<String>,
    pub first_failed_at: SystemTime,
}

/// Dead-letter counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    pub expired: u64,
    pub overflow: u64,
    pub rejected: u64,
    /// Moved into a target queue
    pub routed: u64,
    /// Discarded: no target, missing target or cycle
    pub dropped: u64,
    /// Subset of `dropped` refused because of a dead-letter cycle
    pub cycles: u64,
    pub history: usize,
}

#[derive(Debug, Default)]
struct DeadLetterCounters {
    expired: AtomicU64,
    overflow: AtomicU64,
    rejected: AtomicU64,
    routed: AtomicU64,
    dropped: AtomicU64,
    cycles: AtomicU64,
}

/// Where a dead-lettered message ends up
enum Disposition {
    Routed(String),
    NoTarget,
    MissingTarget(String),
    Cycle(String),
}

#[derive(Debug)]
pub struct DeadLetterHandler {
    history: Mutex<VecDeque<DeadLetterEntry>>,
    history_capacity: usize,
    counters: DeadLetterCounters,
}

impl DeadLetterHandler {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            history_capacity,
            counters: DeadLetterCounters::default(),
        }
    }

    /// Dead-letter `casualties` that left `source_queue`, following cascades
    pub(crate) fn process(
        &self,
        registry: &Registry,
        source_queue: &str,
        casualties: Casualties,
        now: SystemTime,
    ) -> BrokerResult<()> {
        let mut work: VecDeque<(String, Message, DeadLetterReason)> = casualties
            .into_iter()
            .map(|(message, reason)| (source_queue.to_string(), message, reason))
            .collect();

        while let Some((source, mut message, reason)) = work.pop_front() {
            self.count_reason(reason);
            let first_failed_at = *message.envelope.first_failed_at.get_or_insert(now);
            message.state = MessageState::Dead;

            let target = match registry.find_queue(&source)? {
                Some(store) => store.dead_letter_target()?,
                None => None,
            };
            let disposition = match target {
                None => Disposition::NoTarget,
                Some(target)
                    if target == source
                        || message.envelope.dead_letter_path.contains(&target) =>
                {
                    Disposition::Cycle(target)
                }
                Some(target) => match registry.find_queue(&target)? {
                    Some(store) => {
                        annotate(&mut message, reason, &source);
                        let cascade = store.enqueue(message.clone(), now)?;
                        work.extend(
                            cascade
                                .into_iter()
                                .map(|(m, r)| (target.clone(), m, r)),
                        );
                        Disposition::Routed(target)
                    }
                    None => Disposition::MissingTarget(target),
                },
            };

            let target_queue = match disposition {
                Disposition::Routed(target) => {
                    self.counters.routed.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Dead-lettered message {} from '{}' to '{}' ({})",
                        message.id,
                        source,
                        target,
                        reason
                    );
                    Some(target)
                }
                Disposition::NoTarget => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Dropped message {} from '{}' ({}): no dead-letter target",
                        message.id,
                        source,
                        reason
                    );
                    None
                }
                Disposition::MissingTarget(target) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Dropped message {} from '{}' ({}): dead-letter target '{}' does not exist",
                        message.id,
                        source,
                        reason,
                        target
                    );
                    None
                }
                Disposition::Cycle(target) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    self.counters.cycles.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Dropped message {} from '{}' ({}): dead-letter cycle through '{}'",
                        message.id,
                        source,
                        reason,
                        target
                    );
                    None
                }
            };

            self.record(DeadLetterEntry {
                message,
                reason,
                source_queue: source,
                target_queue,
                first_failed_at,
            })?;
        }
        Ok(())
    }

    fn count_reason(&self, reason: DeadLetterReason) {
        let counter = match reason {
            DeadLetterReason::Expired => &self.counters.expired,
            DeadLetterReason::Overflow => &self.counters.overflow,
            DeadLetterReason::Rejected => &self.counters.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, entry: DeadLetterEntry) -> BrokerResult<()> {
        if self.history_capacity == 0 {
            return Ok(());
        }
        let mut history = handle_mutex_poison(self.history.lock(), BrokerError::internal)?;
        while history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(entry);
        Ok(())
    }

    /// Recorded dead-letterings, oldest first
    pub fn entries(&self) -> BrokerResult<Vec<DeadLetterEntry>> {
        let history = handle_mutex_poison(self.history.lock(), BrokerError::internal)?;
        Ok(history.iter().cloned().collect())
    }

    /// Recorded dead-letterings out of `queue`, oldest first
    pub fn entries_for(&self, queue: &str) -> BrokerResult<Vec<DeadLetterEntry>> {
        let history = handle_mutex_poison(self.history.lock(), BrokerError::internal)?;
        Ok(history
            .iter()
            .filter(|entry| entry.source_queue == queue)
            .cloned()
            .collect())
    }

    pub fn stats(&self) -> BrokerResult<DeadLetterStats> {
        let history = handle_mutex_poison(self.history.lock(), BrokerError::internal)?.len();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Ok(DeadLetterStats {
            expired: load(&self.counters.expired),
            overflow: load(&self.counters.overflow),
            rejected: load(&self.counters.rejected),
            routed: load(&self.counters.routed),
            dropped: load(&self.counters.dropped),
            cycles: load(&self.counters.cycles),
            history,
        })
    }
}

/// Prepare a message for its dead-letter queue.
///
/// TTL and delay are cleared so the message does not expire again on arrival,
/// and the delivery count restarts for the new queue's consumers.
fn annotate(message: &mut Message, reason: DeadLetterReason, source: &str) {
    message.envelope.dead_letter_path.push(source.to_string());
    let death_count = message.envelope.dead_letter_path.len();

    message
        .headers
        .insert(X_DEATH_REASON.to_string(), reason.to_string());
    message
        .headers
        .insert(X_ORIGINAL_QUEUE.to_string(), source.to_string());
    message
        .headers
        .insert(X_DEATH_COUNT.to_string(), death_count.to_string());

    message.ttl = None;
    message.delay = None;
    message.delivery_count = 0;
}
