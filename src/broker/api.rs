//! Public API for the broker
//!
//! External modules should import from here rather than from the internal
//! modules directly.

// Facade and handles
pub use crate::broker::consumer::{ConsumerHandle, ConsumerId};
pub use crate::broker::manager::BrokerManager;
pub use crate::broker::publisher::{DeliveryMode, PublishResult, PublishStatus, Publisher};

// Topology
pub use crate::broker::exchange::{Binding, ExchangeKind};
pub use crate::broker::store::{QueueKind, QueueOptions};

// Messages
pub use crate::broker::message::{
    Message, MessageId, MessageState, PublishOptions, MAX_PRIORITY, X_DEATH_COUNT,
    X_DEATH_REASON, X_ORIGINAL_QUEUE,
};

// Configuration
pub use crate::broker::config::{BrokerConfig, BrokerSettings};

// Error handling
pub use crate::broker::error::{BrokerError, BrokerResult};

// Statistics and inspection
pub use crate::broker::consumer::ConsumerStats;
pub use crate::broker::dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterStats};
pub use crate::broker::exchange::ExchangeStats;
pub use crate::broker::publisher::PublisherStats;
pub use crate::broker::store::QueueStats;
pub use crate::broker::types::BrokerStats;
