//! Idempotency window for exactly-once publishing
//!
//! Each producer gets a bounded window of recently published sequence
//! numbers and their results. A publish holds its producer's window lock
//! from lookup to record, so concurrent repeats of one sequence cannot both
//! be stored.
//!
//! The number of producers is bounded too. When a new producer would exceed
//! the limit, the least recently used window that no publish is holding is
//! forgotten, and a retry from that producer is no longer recognised.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::publisher::{PublishResult, PublishStatus};
use crate::core::sync::handle_mutex_poison;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub(crate) struct ProducerWindow {
    capacity: usize,
    order: VecDeque<u64>,
    results: HashMap<u64, PublishResult>,
}

impl ProducerWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            results: HashMap::new(),
        }
    }

    /// The original result re-labelled as a duplicate, if `sequence` was seen
    pub(crate) fn duplicate_of(&self, sequence: u64) -> Option<PublishResult> {
        self.results.get(&sequence).map(|original| PublishResult {
            status: PublishStatus::Duplicate,
            ..original.clone()
        })
    }

    pub(crate) fn remember(&mut self, sequence: u64, result: PublishResult) {
        if self.capacity == 0 {
            return;
        }
        if self.results.insert(sequence, result).is_none() {
            self.order.push_back(sequence);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
struct TrackedWindow {
    last_used: u64,
    window: Arc<Mutex<ProducerWindow>>,
}

#[derive(Debug, Default)]
struct Producers {
    clock: u64,
    windows: HashMap<String, TrackedWindow>,
}

#[derive(Debug)]
pub(crate) struct IdempotencyStore {
    capacity: usize,
    max_producers: usize,
    producers: Mutex<Producers>,
}

impl IdempotencyStore {
    pub(crate) fn new(capacity: usize, max_producers: usize) -> Self {
        Self {
            capacity,
            max_producers: max_producers.max(1),
            producers: Mutex::new(Producers::default()),
        }
    }

    /// The window for `producer_id`, created on first use
    pub(crate) fn window(&self, producer_id: &str) -> BrokerResult<Arc<Mutex<ProducerWindow>>> {
        let mut producers = handle_mutex_poison(self.producers.lock(), BrokerError::internal)?;
        producers.clock += 1;
        let tick = producers.clock;

        if let Some(tracked) = producers.windows.get_mut(producer_id) {
            tracked.last_used = tick;
            return Ok(Arc::clone(&tracked.window));
        }

        if producers.windows.len() >= self.max_producers {
            let idle = producers
                .windows
                .iter()
                .filter(|(_, tracked)| Arc::strong_count(&tracked.window) == 1)
                .min_by_key(|(_, tracked)| tracked.last_used)
                .map(|(name, _)| name.clone());
            if let Some(name) = idle {
                producers.windows.remove(&name);
                log::debug!("Forgot idempotency window of producer '{}'", name);
            }
        }

        let window = Arc::new(Mutex::new(ProducerWindow::new(self.capacity)));
        producers.windows.insert(
            producer_id.to_string(),
            TrackedWindow {
                last_used: tick,
                window: Arc::clone(&window),
            },
        );
        Ok(window)
    }

    #[cfg(test)]
    fn producer_count(&self) -> usize {
        self.producers.lock().map(|p| p.windows.len()).unwrap_or(0)
    }
}
