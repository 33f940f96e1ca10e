//! Exchanges and bindings

use crate::broker::message::Message;
use crate::broker::topic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use strum_macros::{AsRefStr, Display, EnumString};

/// Binding argument selecting how headers exchanges combine comparisons
pub const X_MATCH: &str = "x-match";

/// Routing discipline of an exchange
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Binding pattern equals the routing key
    Direct,
    /// Every binding matches
    Fanout,
    /// Binding pattern is a topic pattern (`*`, `#`)
    Topic,
    /// Binding arguments are compared with message headers
    Headers,
}

/// How a headers binding combines its argument comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HeaderMatch {
    All,
    Any,
}

/// A route from an exchange to a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub pattern: String,
    pub arguments: BTreeMap<String, String>,
}

impl Binding {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        pattern: impl Into<String>,
        arguments: BTreeMap<String, String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            pattern: pattern.into(),
            arguments,
        }
    }

    /// Does this binding accept `message` under the exchange's `kind`?
    pub fn matches(&self, kind: ExchangeKind, message: &Message) -> bool {
        match kind {
            ExchangeKind::Direct => self.pattern == message.routing_key,
            ExchangeKind::Fanout => true,
            ExchangeKind::Topic => topic::matches(&self.pattern, &message.routing_key),
            ExchangeKind::Headers => self.matches_headers(message),
        }
    }

    /// The `x-match` mode; absent or unparseable values mean `all`
    pub fn header_match(&self) -> HeaderMatch {
        self.arguments
            .get(X_MATCH)
            .and_then(|mode| mode.parse().ok())
            .unwrap_or(HeaderMatch::All)
    }

    fn matches_headers(&self, message: &Message) -> bool {
        let mut comparable = self
            .arguments
            .iter()
            .filter(|(key, _)| !key.starts_with("x-"))
            .map(|(key, expected)| message.header(key) == Some(expected.as_str()));

        match self.header_match() {
            // vacuously true with nothing to compare
            HeaderMatch::All => comparable.all(|matched| matched),
            HeaderMatch::Any => comparable.any(|matched| matched),
        }
    }

    fn same_route(&self, queue: &str, pattern: &str, arguments: &BTreeMap<String, String>) -> bool {
        self.queue == queue && self.pattern == pattern && &self.arguments == arguments
    }
}

/// Point-in-time exchange counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeStats {
    pub name: String,
    pub kind: String,
    pub bindings: usize,
    pub messages_in: u64,
    pub messages_routed: u64,
    pub messages_unroutable: u64,
}

/// A named exchange with its bindings and counters
#[derive(Debug)]
pub struct Exchange {
    name: String,
    kind: ExchangeKind,
    bindings: Vec<Binding>,
    messages_in: AtomicU64,
    messages_routed: AtomicU64,
    messages_unroutable: AtomicU64,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bindings: Vec::new(),
            messages_in: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_unroutable: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Add a binding; returns `false` if an identical one already exists
    pub(crate) fn add_binding(&mut self, binding: Binding) -> bool {
        if self
            .bindings
            .iter()
            .any(|b| b.same_route(&binding.queue, &binding.pattern, &binding.arguments))
        {
            return false;
        }
        self.bindings.push(binding);
        true
    }

    /// Remove a binding; returns `false` if it was not present
    pub(crate) fn remove_binding(
        &mut self,
        queue: &str,
        pattern: &str,
        arguments: &BTreeMap<String, String>,
    ) -> bool {
        let before = self.bindings.len();
        self.bindings.retain(|b| !b.same_route(queue, pattern, arguments));
        self.bindings.len() != before
    }

    /// Drop every binding to `queue`, returning how many were removed
    pub(crate) fn remove_queue(&mut self, queue: &str) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|b| b.queue != queue);
        before - self.bindings.len()
    }

    /// Queue names matched by `message`, unsorted and possibly repeated
    pub(crate) fn matching_queues<'a>(
        &'a self,
        message: &'a Message,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.bindings
            .iter()
            .filter(move |b| b.matches(self.kind, message))
            .map(|b| b.queue.as_str())
    }

    pub(crate) fn record_publish(&self, routed: bool) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
        if routed {
            self.messages_routed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_unroutable.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> ExchangeStats {
        ExchangeStats {
            name: self.name.clone(),
            kind: self.kind.to_string(),
            bindings: self.bindings.len(),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_unroutable: self.messages_unroutable.load(Ordering::Relaxed),
        }
    }
}
