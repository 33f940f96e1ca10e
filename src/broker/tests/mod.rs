//! Test modules for the broker
//!
//! Tests are organized by functional area. Every broker here runs on a
//! `ManualClock` so TTL and delay behaviour is deterministic.

mod publisher;

use crate::broker::{BrokerManager, BrokerSettings, Message, QueueKind, QueueOptions};
use crate::core::time::ManualClock;
use std::collections::BTreeMap;
use std::sync::Arc;

fn broker_with(settings: BrokerSettings) -> (Arc<BrokerManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let broker = BrokerManager::create_with_clock(settings, clock.clone());
    (broker, clock)
}

fn broker() -> (Arc<BrokerManager>, Arc<ManualClock>) {
    broker_with(BrokerSettings::default())
}

fn standard() -> QueueOptions {
    QueueOptions::new(QueueKind::Standard)
}

fn no_args() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn bodies(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m.body_str().unwrap_or_default().to_string())
        .collect()
}
