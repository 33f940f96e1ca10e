//! Publishers and publish results
//!
//! A `Publisher` is a handle bound to a producer id and a delivery mode. The
//! mode decides what happens when a message matches no queue, and whether a
//! producer sequence number is used to suppress duplicates.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::manager::BrokerManager;
use crate::broker::message::{MessageId, PublishOptions, MAX_PRIORITY};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use strum_macros::{AsRefStr, Display, EnumString};

/// Producer id used by `BrokerManager::publish`
pub const DEFAULT_PRODUCER: &str = "default";

/// Publish guarantee requested by a producer
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Fire and forget; unroutable messages are reported but not an error
    AtMostOnce,
    /// Publisher confirms; unroutable messages are an error
    #[default]
    AtLeastOnce,
    /// Confirms plus per-producer sequence de-duplication
    ExactlyOnce,
}

/// Outcome of a publish that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Routed,
    /// No queue matched (at-most-once only)
    Unroutable,
    /// Repeat of an already published sequence; nothing was stored
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    /// Id of the copy stored in the first matched queue
    pub message_id: MessageId,
    pub routed_count: usize,
    /// Every stored copy as `(queue, message id)`, in queue name order
    pub copies: Vec<(String, MessageId)>,
    pub status: PublishStatus,
}

impl PublishResult {
    pub fn is_routed(&self) -> bool {
        self.routed_count > 0
    }
}

/// Reject option values the broker cannot honour
pub(crate) fn validate_options(options: &PublishOptions, mode: DeliveryMode) -> BrokerResult<()> {
    if options.priority > MAX_PRIORITY {
        return Err(BrokerError::validation(format!(
            "priority {} is out of range 0-{}",
            options.priority, MAX_PRIORITY
        )));
    }
    if mode == DeliveryMode::ExactlyOnce && options.sequence.is_none() {
        return Err(BrokerError::validation(
            "exactly_once publishing requires a producer sequence number",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    pub producer_id: String,
    pub mode: DeliveryMode,
    pub published: u64,
    pub routed: u64,
    pub unroutable: u64,
    pub duplicates: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct PublisherCounters {
    published: AtomicU64,
    routed: AtomicU64,
    unroutable: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

/// Publisher handle for one producer
///
/// # Example
///
/// ```rust
/// use routemq::broker::{BrokerManager, DeliveryMode, ExchangeKind, PublishOptions, PublishStatus};
///
/// # fn example() -> Result<(), routemq::broker::BrokerError> {
/// let broker = BrokerManager::create();
/// broker.declare_exchange("audit", ExchangeKind::Fanout)?;
///
/// let publisher = broker.create_publisher("billing", DeliveryMode::AtMostOnce)?;
/// let result = publisher.publish("audit", "invoice.paid", b"{}", PublishOptions::new())?;
/// assert_eq!(result.status, PublishStatus::Unroutable);
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
#[derive(Debug)]
pub struct Publisher {
    producer_id: String,
    mode: DeliveryMode,
    manager: Weak<BrokerManager>,
    counters: PublisherCounters,
}

impl Publisher {
    pub(crate) fn new(producer_id: String, mode: DeliveryMode, manager: Weak<BrokerManager>) -> Self {
        Self {
            producer_id,
            mode,
            manager,
            counters: PublisherCounters::default(),
        }
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    fn manager(&self) -> BrokerResult<Arc<BrokerManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| BrokerError::internal("BrokerManager no longer exists".to_string()))
    }

    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl AsRef<[u8]>,
        options: PublishOptions,
    ) -> BrokerResult<PublishResult> {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let outcome = self.manager()?.publish_as(
            &self.producer_id,
            self.mode,
            exchange,
            routing_key,
            body.as_ref(),
            options,
        );

        let counter = match &outcome {
            Ok(result) => match result.status {
                PublishStatus::Routed => &self.counters.routed,
                PublishStatus::Unroutable => &self.counters.unroutable,
                PublishStatus::Duplicate => &self.counters.duplicates,
            },
            Err(BrokerError::Unroutable { .. }) => &self.counters.unroutable,
            Err(_) => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    pub fn stats(&self) -> PublisherStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PublisherStats {
            producer_id: self.producer_id.clone(),
            mode: self.mode,
            published: load(&self.counters.published),
            routed: load(&self.counters.routed),
            unroutable: load(&self.counters.unroutable),
            duplicates: load(&self.counters.duplicates),
            failed: load(&self.counters.failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_out_of_range() {
        let err = validate_options(
            &PublishOptions::new().priority(10),
            DeliveryMode::AtLeastOnce,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: priority 10 is out of range 0-9"
        );
        assert!(
            validate_options(&PublishOptions::new().priority(9), DeliveryMode::AtLeastOnce)
                .is_ok()
        );
    }

    #[test]
    fn test_exactly_once_requires_sequence() {
        assert!(validate_options(&PublishOptions::new(), DeliveryMode::ExactlyOnce).is_err());
        assert!(
            validate_options(&PublishOptions::new().sequence(1), DeliveryMode::ExactlyOnce)
                .is_ok()
        );
    }

    #[test]
    fn test_delivery_mode_parsing() {
        assert_eq!(
            "exactly_once".parse::<DeliveryMode>().unwrap(),
            DeliveryMode::ExactlyOnce
        );
        assert_eq!(DeliveryMode::default(), DeliveryMode::AtLeastOnce);
        assert_eq!(DeliveryMode::AtMostOnce.to_string(), "at_most_once");
        assert!("twice".parse::<DeliveryMode>().is_err());
    }
}
