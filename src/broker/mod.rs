//! In-process Message Broker
//!
//! Exchange-based routing, queue storage and ordering, consumer flow control
//! and dead-letter handling, all in one process.
//!
//! # Overview
//!
//! - **Exchanges** route each published message to zero or more queues
//!   through their bindings: `direct` (exact key), `fanout` (every binding),
//!   `topic` (`*` / `#` patterns) and `headers` (`x-match` all/any).
//! - **Queues** store messages in arrival order, priority order or delay
//!   order, with per-message TTL and an optional length bound.
//! - **Consumers** pull messages with a prefetch bound and settle each one
//!   with ack or reject; unacked messages return to the queue on cancel.
//! - **Dead-lettering** moves expired, overflowed and exhausted messages to
//!   a queue's configured target.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish   ┌───────────────────────────────┐
//! │  Publisher   │────────────▶│ Registry                      │
//! └──────────────┘             │  exchange ─ bindings ─▶ queues │
//!                              └──────────────┬────────────────┘
//!                                             │ enqueue (one copy per queue)
//!                    ┌────────────────────────┼────────────────────┐
//!                    ▼                        ▼                    ▼
//!             ┌─────────────┐          ┌─────────────┐      ┌─────────────┐
//!             │ QueueStore  │          │ QueueStore  │      │ QueueStore  │
//!             └──────┬──────┘          └──────┬──────┘      └─────────────┘
//!        consume/ack │ expire, overflow,      │
//!                    ▼ reject                 ▼
//!             ┌─────────────┐          ┌──────────────────┐
//!             │  Consumer   │─────────▶│ DeadLetterHandler│──▶ target queue
//!             └─────────────┘          └──────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use routemq::broker::{BrokerManager, ExchangeKind, PublishOptions, QueueKind, QueueOptions};
//! use std::collections::BTreeMap;
//!
//! # fn example() -> Result<(), routemq::broker::BrokerError> {
//! let broker = BrokerManager::create();
//! broker.declare_exchange("orders", ExchangeKind::Topic)?;
//! broker.declare_queue("eu", QueueOptions::new(QueueKind::Priority))?;
//! broker.bind("orders", "eu", "orders.eu.#", BTreeMap::new())?;
//!
//! broker.publish("orders", "orders.eu.created", "{\"id\":1}", PublishOptions::new().priority(5))?;
//!
//! let consumer = broker.subscribe("eu", 10)?;
//! for message in consumer.consume(10)? {
//!     consumer.ack(message.id)?;
//! }
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod api;
pub mod config;
pub mod consumer;
pub mod dead_letter;
mod dedup;
pub mod error;
pub mod exchange;
pub mod manager;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod store;
pub mod topic;
pub mod types;

pub use config::{BindingConfig, BrokerConfig, BrokerSettings, ExchangeConfig, QueueConfig};
pub use consumer::{ConsumerHandle, ConsumerId, ConsumerStats};
pub use dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterStats};
pub use error::{BrokerError, BrokerResult};
pub use exchange::{Binding, ExchangeKind, ExchangeStats, HeaderMatch};
pub use manager::BrokerManager;
pub use message::{Message, MessageId, MessageState, PublishOptions};
pub use publisher::{DeliveryMode, PublishResult, PublishStatus, Publisher, PublisherStats};
pub use store::{QueueKind, QueueOptions, QueueStats};
pub use types::BrokerStats;

#[cfg(test)]
mod tests;
