//! Broker configuration
//!
//! Everything is optional; an empty document yields a broker with default
//! settings and no topology.
//!
//! ```toml
//! [broker]
//! max_deliveries = 5
//! delivery_mode = "at_least_once"
//!
//! [[exchanges]]
//! name = "events"
//! kind = "topic"
//!
//! [[queues]]
//! name = "audit"
//! kind = "priority"
//! dead_letter = "audit.dlq"
//!
//! [[bindings]]
//! exchange = "events"
//! queue = "audit"
//! pattern = "audit.#"
//! ```

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::exchange::ExchangeKind;
use crate::broker::publisher::DeliveryMode;
use crate::broker::store::{QueueKind, QueueOptions};
use crate::core::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Broker-wide tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSettings {
    /// Redelivery limit for queues without their own override
    pub max_deliveries: u32,
    /// Prefetch used when a caller does not pick one
    pub default_prefetch: usize,
    /// Dead-letter entries kept for inspection
    pub dead_letter_history: usize,
    /// Sequence numbers remembered per exactly-once producer
    pub dedup_window: usize,
    /// Exactly-once producers tracked at once; the least recently used idle one is forgotten first
    pub dedup_producers: usize,
    /// Mode used by `BrokerManager::publish`
    pub delivery_mode: DeliveryMode,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            default_prefetch: 10,
            dead_letter_history: 1000,
            dedup_window: 10_000,
            dedup_producers: 1024,
            delivery_mode: DeliveryMode::AtLeastOnce,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    pub name: String,
    #[serde(default)]
    pub kind: QueueKind,
    #[serde(default)]
    pub max_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deliveries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<String>,
}

impl QueueConfig {
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            kind: self.kind,
            max_length: self.max_length,
            default_ttl: self.default_ttl_ms.map(Duration::from_millis),
            max_deliveries: self.max_deliveries,
            dead_letter: self.dead_letter.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    pub exchange: String,
    pub queue: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// Complete configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub broker: BrokerSettings,
    pub logging: LoggingConfig,
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
    pub bindings: Vec<BindingConfig>,
}

impl BrokerConfig {
    pub fn from_toml_str(contents: &str) -> BrokerResult<Self> {
        let config: BrokerConfig = toml::from_str(contents).map_err(|e| BrokerError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BrokerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| BrokerError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            BrokerError::Config { message } => BrokerError::Config {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    pub fn to_toml_string(&self) -> BrokerResult<String> {
        toml::to_string_pretty(self).map_err(|e| BrokerError::Config {
            message: e.to_string(),
        })
    }

    /// Cross-reference checks serde cannot express
    pub fn validate(&self) -> BrokerResult<()> {
        let config_error = |message: String| Err(BrokerError::Config { message });

        if self.broker.max_deliveries == 0 {
            return config_error("broker.max_deliveries must be at least 1".to_string());
        }
        if self.broker.default_prefetch == 0 {
            return config_error("broker.default_prefetch must be at least 1".to_string());
        }
        if let Some(format) = &self.logging.format {
            if format.parse::<LogFormat>().is_err() {
                return config_error(format!(
                    "logging.format '{}' is not one of text, ext, json",
                    format
                ));
            }
        }

        let mut exchanges = HashSet::new();
        for exchange in &self.exchanges {
            if !exchanges.insert(exchange.name.as_str()) {
                return config_error(format!("exchange '{}' is declared twice", exchange.name));
            }
        }

        let mut queues = HashSet::new();
        for queue in &self.queues {
            if !queues.insert(queue.name.as_str()) {
                return config_error(format!("queue '{}' is declared twice", queue.name));
            }
        }
        for queue in &self.queues {
            if let Some(target) = &queue.dead_letter {
                if !queues.contains(target.as_str()) {
                    return config_error(format!(
                        "queue '{}' dead-letters to undeclared queue '{}'",
                        queue.name, target
                    ));
                }
            }
        }

        for binding in &self.bindings {
            if !exchanges.contains(binding.exchange.as_str()) {
                return config_error(format!(
                    "binding refers to undeclared exchange '{}'",
                    binding.exchange
                ));
            }
            if !queues.contains(binding.queue.as_str()) {
                return config_error(format!(
                    "binding refers to undeclared queue '{}'",
                    binding.queue
                ));
            }
        }
        Ok(())
    }
}
