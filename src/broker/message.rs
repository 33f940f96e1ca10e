//! Message Types
//!
//! A `Message` has an immutable identity (id, routing key, body, headers,
//! priority, ttl, delay, creation time) and a small amount of delivery state
//! that changes as it moves between a queue, a consumer and the dead-letter
//! handler. Bodies are `Arc`-shared so fanout copies do not duplicate payloads.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use strum_macros::{AsRefStr, Display};

/// Highest accepted message priority
pub const MAX_PRIORITY: u8 = 9;

/// Header set on dead-lettered messages: `expired`, `overflow` or `rejected`
pub const X_DEATH_REASON: &str = "x-death-reason";
/// Header set on dead-lettered messages: the queue the message left
pub const X_ORIGINAL_QUEUE: &str = "x-original-queue";
/// Header set on dead-lettered messages: how many times it has been dead-lettered
pub const X_DEATH_COUNT: &str = "x-death-count";

/// Broker-assigned message identifier, unique per broker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Pending,
    Delivered,
    Acknowledged,
    Dead,
}

/// Per-publish options
///
/// # Example
///
/// ```rust
/// use routemq::broker::PublishOptions;
/// use std::time::Duration;
///
/// let options = PublishOptions::new()
///     .priority(7)
///     .ttl(Duration::from_secs(30))
///     .header("tenant", "acme");
/// assert_eq!(options.priority, 7);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub priority: u8,
    pub ttl: Option<Duration>,
    pub delay: Option<Duration>,
    pub headers: HashMap<String, String>,
    /// Producer sequence number, required for exactly-once publishers
    pub sequence: Option<u64>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Build options from the integer-millisecond form used by config and CLI input.
    /// Negative values are rejected here since `Duration` cannot hold them.
    pub fn from_millis(
        priority: i64,
        ttl_ms: Option<i64>,
        delay_ms: Option<i64>,
    ) -> Result<Self, String> {
        let priority = u8::try_from(priority)
            .map_err(|_| format!("priority {} is out of range 0-{}", priority, MAX_PRIORITY))?;
        let to_duration = |label: &str, value: Option<i64>| -> Result<Option<Duration>, String> {
            match value {
                Some(ms) if ms < 0 => Err(format!("{} must not be negative, got {}", label, ms)),
                Some(ms) => Ok(Some(Duration::from_millis(ms as u64))),
                None => Ok(None),
            }
        };

        Ok(Self {
            priority,
            ttl: to_duration("ttl", ttl_ms)?,
            delay: to_duration("delay", delay_ms)?,
            ..Self::default()
        })
    }
}

/// Broker-private bookkeeping that travels with a message
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Envelope {
    /// Arrival order within the queue currently holding the message
    pub(crate) sequence: u64,
    pub(crate) expires_at: Option<SystemTime>,
    pub(crate) available_at: Option<SystemTime>,
    /// Queues this message has been dead-lettered out of, oldest first
    pub(crate) dead_letter_path: Vec<String>,
    pub(crate) first_failed_at: Option<SystemTime>,
}

/// A message as stored, delivered and dead-lettered by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub routing_key: String,
    pub body: Arc<[u8]>,
    pub headers: HashMap<String, String>,
    pub priority: u8,
    pub ttl: Option<Duration>,
    pub delay: Option<Duration>,
    pub created_at: SystemTime,
    pub state: MessageState,
    pub delivery_count: u32,
    pub(crate) envelope: Envelope,
}

impl Message {
    pub(crate) fn new(
        id: MessageId,
        routing_key: &str,
        body: Arc<[u8]>,
        options: &PublishOptions,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id,
            routing_key: routing_key.to_string(),
            body,
            headers: options.headers.clone(),
            priority: options.priority,
            ttl: options.ttl,
            delay: options.delay,
            created_at,
            state: MessageState::Pending,
            delivery_count: 0,
            envelope: Envelope::default(),
        }
    }

    /// Independent copy for another matched queue: same payload, new identity
    pub(crate) fn copy_with_id(&self, id: MessageId) -> Self {
        Self {
            id,
            envelope: Envelope::default(),
            ..self.clone()
        }
    }

    /// Body as UTF-8, if it is valid UTF-8
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Reason recorded by the most recent dead-lettering, if any
    pub fn death_reason(&self) -> Option<&str> {
        self.header(X_DEATH_REASON)
    }

    /// Queue the message was dead-lettered out of most recently, if any
    pub fn original_queue(&self) -> Option<&str> {
        self.header(X_ORIGINAL_QUEUE)
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.envelope.expires_at
    }

    pub fn available_at(&self) -> Option<SystemTime> {
        self.envelope.available_at
    }

    pub fn first_failed_at(&self) -> Option<SystemTime> {
        self.envelope.first_failed_at
    }

    /// True once the message has been handed to a consumer more than once
    pub fn is_redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    /// Expiry is inclusive: a zero TTL is expired the instant it is stored
    pub(crate) fn is_expired(&self, now: SystemTime) -> bool {
        self.envelope.expires_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn is_gated(&self, now: SystemTime) -> bool {
        self.envelope.available_at.is_some_and(|at| at > now)
    }

    /// Approximate retained size, used for queue byte statistics
    pub(crate) fn approximate_size(&self) -> usize {
        std::mem::size_of::<Message>()
            + self.body.len()
            + self.routing_key.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}
